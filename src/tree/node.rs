use crate::types::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A stable node identifier, assigned at construction from a process-wide
/// counter. Preserved through structural rewrites unless a clone explicitly
/// requests fresh IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

fn next_id() -> NodeId {
    NodeId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
}

/// The node type families from the data model: atoms, references,
/// expressions, logic, relational nodes, DML, transactional, and DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    // Atoms
    Identifier,
    LiteralNumber,
    LiteralString,
    LiteralBoolean,
    LiteralNull,
    // References
    ColumnName,
    TableName,
    ColumnRef,
    // Expressions
    Comparison,
    ArithExpr,
    InExpr,
    NotInExpr,
    ExistsExpr,
    NotExistsExpr,
    BetweenExpr,
    IsNullExpr,
    IsNotNullExpr,
    LikeExpr,
    // Logic
    Operator,
    // Relational
    Project,
    Filter,
    Sort,
    OrderItem,
    Limit,
    Join,
    Relation,
    Alias,
    List,
    // DML
    UpdateQuery,
    InsertQuery,
    DeleteQuery,
    Assignment,
    // Transactional
    BeginTransaction,
    Commit,
    // DDL
    CreateTable,
    DropTable,
    ColumnDefNode,
}

/// The payload carried by a node, independent of its structural children.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    None,
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// Operator name, comparison symbol, or join method tag (e.g. "AND",
    /// "=", "NATURAL").
    Op(String),
}

impl NodeValue {
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            NodeValue::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&str> {
        match self {
            NodeValue::Op(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            NodeValue::None => Value::Null,
            NodeValue::Ident(s) | NodeValue::Str(s) => Value::String(s.clone()),
            NodeValue::Int(i) => Value::Integer(*i),
            NodeValue::Float(f) => Value::Float(*f),
            NodeValue::Bool(b) => Value::Boolean(*b),
            NodeValue::Op(s) => Value::String(s.clone()),
        }
    }
}

/// A node in the algebraic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub value: NodeValue,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, value: NodeValue, children: Vec<Node>) -> Self {
        Self { id: next_id(), kind, value, children }
    }

    pub fn leaf(kind: NodeKind, value: NodeValue) -> Self {
        Self::new(kind, value, vec![])
    }

    /// Deep clone. When `preserve_ids` is false, every node in the clone is
    /// assigned a fresh ID (the optimizer's parameter maps keyed by the old
    /// IDs must then be rebuilt against the new tree); when true, IDs are
    /// copied verbatim so existing parameter maps still apply.
    pub fn clone_tree(&self, preserve_ids: bool) -> Node {
        Node {
            id: if preserve_ids { self.id } else { next_id() },
            kind: self.kind,
            value: self.value.clone(),
            children: self.children.iter().map(|c| c.clone_tree(preserve_ids)).collect(),
        }
    }

    /// Pre-order traversal: visits a node before its children.
    pub fn preorder<'a>(&'a self, out: &mut Vec<&'a Node>) {
        out.push(self);
        for c in &self.children {
            c.preorder(out);
        }
    }

    /// Post-order traversal: visits children before the node itself.
    pub fn postorder<'a>(&'a self, out: &mut Vec<&'a Node>) {
        for c in &self.children {
            c.postorder(out);
        }
        out.push(self);
    }

    /// Collect all nodes of a given kind, pre-order.
    pub fn find_by_kind(&self, kind: NodeKind) -> Vec<&Node> {
        let mut all = Vec::new();
        self.preorder(&mut all);
        all.into_iter().filter(|n| n.kind == kind).collect()
    }

    /// Find a node by ID anywhere in this subtree.
    pub fn find_by_id(&self, id: NodeId) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    pub fn find_by_id_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_by_id_mut(id))
    }

    /// Replace the subtree rooted at `id` with `replacement`, returning
    /// true if a matching node was found.
    pub fn replace_subtree(&mut self, id: NodeId, replacement: Node) -> bool {
        if self.id == id {
            *self = replacement;
            return true;
        }
        for c in &mut self.children {
            if c.replace_subtree(id, replacement.clone()) {
                return true;
            }
        }
        false
    }
}
