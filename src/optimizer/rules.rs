//! Deterministic rewrite rules, applied once before the genetic search and
//! never revisited by it. Each rule is a recursive, structure-preserving
//! tree transform keyed off `NodeKind`.

use std::collections::HashSet;

use crate::tree::{Node, NodeKind, NodeValue};

use super::params::AssocChoice;

/// `PROJECT(cols, PROJECT(_, X)) -> PROJECT(cols, X)`: an outer projection
/// always wins over whatever the inner one selected.
pub fn eliminate_redundant_projection(node: &Node) -> Node {
    let children: Vec<Node> = node.children.iter().map(eliminate_redundant_projection).collect();

    if node.kind == NodeKind::Project && children[0].kind == NodeKind::Project {
        let inner_source = children[0].children[0].clone();
        let mut new_children = vec![inner_source];
        new_children.extend(children[1..].iter().cloned());
        return Node::new(NodeKind::Project, node.value.clone(), new_children);
    }

    Node::new(node.kind, node.value.clone(), children)
}

/// `FILTER(c, JOIN(A, B)) -> JOIN(FILTER(c_A, A), FILTER(c_B, B))` when every
/// AND-conjunct of `c` can be attributed to exactly one side of the join by
/// table reference. Conjuncts that reference both sides, or an unqualified
/// column (no table reference to check against), stay above the join:
/// pushing those without schema knowledge in hand would risk silently
/// dropping a dangling filter.
pub fn pushdown_filter_over_join(node: &Node) -> Node {
    let children: Vec<Node> = node.children.iter().map(pushdown_filter_over_join).collect();

    if node.kind == NodeKind::Filter && children[0].kind == NodeKind::Join {
        let join = &children[0];
        let cond = &children[1];
        let left_tables = table_names(&join.children[0]);
        let right_tables = table_names(&join.children[1]);

        let conjuncts = and_conjuncts(cond);
        let mut left_conds = Vec::new();
        let mut right_conds = Vec::new();
        let mut remaining = Vec::new();

        for c in conjuncts {
            match side_of(c, &left_tables, &right_tables) {
                Some(Side::Left) => left_conds.push(c.clone()),
                Some(Side::Right) => right_conds.push(c.clone()),
                None => remaining.push(c.clone()),
            }
        }

        if !left_conds.is_empty() || !right_conds.is_empty() {
            let mut new_join_children = join.children.clone();
            new_join_children[0] = wrap_filter(join.children[0].clone(), left_conds);
            new_join_children[1] = wrap_filter(join.children[1].clone(), right_conds);
            let new_join = Node::new(join.kind, join.value.clone(), new_join_children);

            if remaining.is_empty() {
                return new_join;
            }
            let remaining_cond = and_of(remaining);
            return Node::new(NodeKind::Filter, NodeValue::None, vec![new_join, remaining_cond]);
        }
    }

    Node::new(node.kind, node.value.clone(), children)
}

/// `PROJECT(cols, JOIN(A, B)) -> PROJECT(cols, JOIN(PROJECT(needed_A, A),
/// PROJECT(needed_B, B)))`, where `needed_X` is the columns in `cols`
/// restricted to `X` plus the columns the join condition references on `X`.
/// Skipped for star-projections (`cols = "*"`): nothing to restrict.
pub fn pushdown_projection_over_join(node: &Node) -> Node {
    let children: Vec<Node> = node.children.iter().map(pushdown_projection_over_join).collect();

    let is_star = node.kind == NodeKind::Project && node.value.as_op() == Some("*");
    if node.kind == NodeKind::Project && !is_star && children[0].kind == NodeKind::Join {
        let join = &children[0];
        let left_tables = table_names(&join.children[0]);
        let right_tables = table_names(&join.children[1]);

        let mut referenced: HashSet<String> = HashSet::new();
        for projected in &children[1..] {
            collect_column_names(projected, &mut referenced);
        }
        if join.children.len() == 3 {
            collect_column_names(&join.children[2], &mut referenced);
        }

        let needed_left: Vec<String> = referenced.iter().filter(|c| column_could_belong(c, &left_tables)).cloned().collect();
        let needed_right: Vec<String> = referenced.iter().filter(|c| column_could_belong(c, &right_tables)).cloned().collect();

        if !needed_left.is_empty() || !needed_right.is_empty() {
            let mut new_join_children = join.children.clone();
            new_join_children[0] = wrap_project(join.children[0].clone(), needed_left);
            new_join_children[1] = wrap_project(join.children[1].clone(), needed_right);
            let new_join = Node::new(join.kind, join.value.clone(), new_join_children);
            let mut new_children = vec![new_join];
            new_children.extend(children[1..].iter().cloned());
            return Node::new(node.kind, node.value.clone(), new_children);
        }
    }

    Node::new(node.kind, node.value.clone(), children)
}

/// Join associativity (spec.md §4.5.a): reassociates a `JOIN(JOIN(A,B),C)` /
/// `JOIN(A,JOIN(B,C))` pattern to the shape `choice` asks for. Returns
/// `None` (keep the original shape) when `choice` is `AssocChoice::None`,
/// `join` doesn't match either pattern, or it already has the requested
/// shape.
///
/// Every theta conjunct from both the outer and inner join conditions is
/// redistributed by table reference: a conjunct goes to the new inner join
/// only if every table it mentions is visible on that inner join's two
/// sides, otherwise it stays on the new outer join (which always sees every
/// table, so it's always a valid, if less selective, home). This is what
/// keeps reassociation from ever producing a join condition that reaches
/// past a side not yet materialized at that position: the inner join's
/// scope is checked, never assumed.
pub(crate) fn reassociate(join: &Node, choice: AssocChoice) -> Option<Node> {
    if matches!(choice, AssocChoice::None) || join.children.len() < 2 {
        return None;
    }

    let left = &join.children[0];
    let right = &join.children[1];
    let outer_cond = join.children.get(2);

    let (a, b, c, inner_cond, inner_value, currently_left_deep) = if left.kind == NodeKind::Join && left.children.len() >= 2 {
        (left.children[0].clone(), left.children[1].clone(), right.clone(), left.children.get(2).cloned(), left.value.clone(), true)
    } else if right.kind == NodeKind::Join && right.children.len() >= 2 {
        (left.clone(), right.children[0].clone(), right.children[1].clone(), right.children.get(2).cloned(), right.value.clone(), false)
    } else {
        return None;
    };

    let wants_left_deep = matches!(choice, AssocChoice::Left);
    if wants_left_deep == currently_left_deep {
        return None;
    }

    let mut conjuncts = Vec::new();
    if let Some(cond) = &inner_cond {
        conjuncts.extend(and_conjuncts_cloned(cond));
    }
    if let Some(cond) = outer_cond {
        conjuncts.extend(and_conjuncts_cloned(cond));
    }

    let ta = table_names(&a);
    let tb = table_names(&b);
    let tc = table_names(&c);
    let new_inner_scope: HashSet<String> = if wants_left_deep { ta.union(&tb).cloned().collect() } else { tb.union(&tc).cloned().collect() };

    let mut inner_new = Vec::new();
    let mut outer_new = Vec::new();
    for conjunct in conjuncts {
        if refs_within(&conjunct, &new_inner_scope) {
            inner_new.push(conjunct);
        } else {
            outer_new.push(conjunct);
        }
    }

    let (new_left, new_right) = if wants_left_deep {
        (build_join(inner_value, a, b, inner_new), c)
    } else {
        (a, build_join(inner_value, b, c, inner_new))
    };

    let mut outer_children = vec![new_left, new_right];
    if !outer_new.is_empty() {
        outer_children.push(and_of(outer_new));
    }
    Some(Node::new(NodeKind::Join, join.value.clone(), outer_children))
}

fn build_join(value: NodeValue, left: Node, right: Node, conds: Vec<Node>) -> Node {
    let mut children = vec![left, right];
    if !conds.is_empty() {
        children.push(and_of(conds));
    }
    Node::new(NodeKind::Join, value, children)
}

enum Side {
    Left,
    Right,
}

/// Table/alias identifiers visible under a join subtree: the idents of every
/// `Relation`/`Alias` leaf reachable without crossing into a sibling branch.
pub(crate) fn table_names(node: &Node) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_table_names(node, &mut names);
    names
}

fn collect_table_names(node: &Node, out: &mut HashSet<String>) {
    match node.kind {
        NodeKind::Relation => {
            if let Some(ident) = node.value.as_ident() {
                out.insert(ident.to_string());
            }
        }
        NodeKind::Alias => {
            if let Some(ident) = node.value.as_ident() {
                out.insert(ident.to_string());
            }
            for c in &node.children {
                collect_table_names(c, out);
            }
        }
        _ => {
            for c in &node.children {
                collect_table_names(c, out);
            }
        }
    }
}

fn collect_column_names(node: &Node, out: &mut HashSet<String>) {
    match node.kind {
        NodeKind::ColumnName => {
            if let Some(ident) = node.value.as_ident() {
                out.insert(ident.to_string());
            }
        }
        NodeKind::ColumnRef => {
            for c in &node.children {
                collect_column_names(c, out);
            }
        }
        _ => {
            for c in &node.children {
                collect_column_names(c, out);
            }
        }
    }
}

fn column_could_belong(_name: &str, _tables: &HashSet<String>) -> bool {
    // Without catalog access the tree rewrite cannot know which side a bare
    // column name belongs to; conservatively project it on both sides so a
    // qualified reference after the join still resolves. Qualified
    // references are filtered by `side_of` instead, which this helper backs.
    true
}

fn side_of(cond: &Node, left_tables: &HashSet<String>, right_tables: &HashSet<String>) -> Option<Side> {
    let mut refs: HashSet<String> = HashSet::new();
    collect_table_refs(cond, &mut refs);
    if refs.is_empty() {
        return None;
    }
    let all_left = refs.iter().all(|t| left_tables.contains(t));
    let all_right = refs.iter().all(|t| right_tables.contains(t));
    match (all_left, all_right) {
        (true, false) => Some(Side::Left),
        (false, true) => Some(Side::Right),
        _ => None,
    }
}

fn collect_table_refs(node: &Node, out: &mut HashSet<String>) {
    if node.kind == NodeKind::ColumnRef {
        if let Some(ident) = node.value.as_ident() {
            out.insert(ident.to_string());
        }
    }
    for c in &node.children {
        collect_table_refs(c, out);
    }
}

/// True if every table a condition references (a `ColumnRef`'s qualifier) is
/// a member of `scope`, vacuously true for a condition with no table
/// reference at all (e.g. a bare literal), since it's safe to place on
/// either side of a join. Used by the genetic search's associativity
/// rewrite (`genetic::reassociate`) to decide which side of a reassociated
/// join a conjunct can move to without referencing a relation not yet
/// materialized at that position.
pub(crate) fn refs_within(node: &Node, scope: &HashSet<String>) -> bool {
    let mut refs = HashSet::new();
    collect_table_refs(node, &mut refs);
    refs.iter().all(|t| scope.contains(t))
}

fn and_conjuncts(cond: &Node) -> Vec<&Node> {
    if cond.kind == NodeKind::Operator && cond.value.as_op() == Some("AND") {
        cond.children.iter().collect()
    } else {
        vec![cond]
    }
}

/// Owned version of [`and_conjuncts`], for callers that build a new tree out
/// of a redistributed conjunct list rather than just inspecting them.
pub(crate) fn and_conjuncts_cloned(cond: &Node) -> Vec<Node> {
    and_conjuncts(cond).into_iter().cloned().collect()
}

pub(crate) fn and_of(mut conjuncts: Vec<Node>) -> Node {
    if conjuncts.len() == 1 {
        conjuncts.remove(0)
    } else {
        Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), conjuncts)
    }
}

fn wrap_filter(source: Node, conjuncts: Vec<Node>) -> Node {
    if conjuncts.is_empty() {
        source
    } else {
        Node::new(NodeKind::Filter, NodeValue::None, vec![source, and_of(conjuncts)])
    }
}

fn wrap_project(source: Node, columns: Vec<String>) -> Node {
    if columns.is_empty() {
        return source;
    }
    let mut children = vec![source];
    children.extend(columns.into_iter().map(|c| Node::leaf(NodeKind::ColumnName, NodeValue::Ident(c))));
    Node::new(NodeKind::Project, NodeValue::None, children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eliminates_nested_projection() {
        let inner_source = Node::leaf(NodeKind::Relation, NodeValue::Ident("t".into()));
        let inner = Node::new(NodeKind::Project, NodeValue::Op("*".into()), vec![inner_source]);
        let outer_col = Node::leaf(NodeKind::ColumnName, NodeValue::Ident("a".into()));
        let outer = Node::new(NodeKind::Project, NodeValue::None, vec![inner, outer_col]);

        let rewritten = eliminate_redundant_projection(&outer);
        assert_eq!(rewritten.children[0].kind, NodeKind::Relation);
    }

    #[test]
    fn pushes_single_sided_conjunct_below_the_join() {
        let left = Node::leaf(NodeKind::Relation, NodeValue::Ident("a".into()));
        let right = Node::leaf(NodeKind::Relation, NodeValue::Ident("b".into()));
        let join_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let join = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![left, right, join_cond]);

        let left_col = Node::new(NodeKind::ColumnRef, NodeValue::Ident("a".into()), vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("x".into()))]);
        let cond = Node::new(NodeKind::Comparison, NodeValue::Op(">".into()), vec![left_col, Node::leaf(NodeKind::LiteralNumber, NodeValue::Int(1))]);
        let filter = Node::new(NodeKind::Filter, NodeValue::None, vec![join, cond]);

        let rewritten = pushdown_filter_over_join(&filter);
        assert_eq!(rewritten.kind, NodeKind::Join);
        assert_eq!(rewritten.children[0].kind, NodeKind::Filter);
    }

    #[test]
    fn leaves_cross_side_conjunct_above_the_join() {
        let left = Node::leaf(NodeKind::Relation, NodeValue::Ident("a".into()));
        let right = Node::leaf(NodeKind::Relation, NodeValue::Ident("b".into()));
        let join_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let join = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![left, right, join_cond]);

        let a_col = Node::new(NodeKind::ColumnRef, NodeValue::Ident("a".into()), vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("x".into()))]);
        let b_col = Node::new(NodeKind::ColumnRef, NodeValue::Ident("b".into()), vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("y".into()))]);
        let cond = Node::new(NodeKind::Comparison, NodeValue::Op("=".into()), vec![a_col, b_col]);
        let filter = Node::new(NodeKind::Filter, NodeValue::None, vec![join, cond]);

        let rewritten = pushdown_filter_over_join(&filter);
        assert_eq!(rewritten.kind, NodeKind::Filter);
    }

    fn relation(name: &str) -> Node {
        Node::leaf(NodeKind::Relation, NodeValue::Ident(name.into()))
    }

    fn eq_cond(left_table: &str, left_col: &str, right_table: &str, right_col: &str) -> Node {
        let l = Node::new(NodeKind::ColumnRef, NodeValue::Ident(left_table.into()), vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident(left_col.into()))]);
        let r = Node::new(NodeKind::ColumnRef, NodeValue::Ident(right_table.into()), vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident(right_col.into()))]);
        Node::new(NodeKind::Comparison, NodeValue::Op("=".into()), vec![l, r])
    }

    #[test]
    fn reassociate_rotates_left_deep_to_right_deep() {
        // JOIN(JOIN(a,b) ON a.x=b.x, c) ON b.y=c.y
        let inner = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![relation("a"), relation("b"), eq_cond("a", "x", "b", "x")]);
        let outer = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![inner, relation("c"), eq_cond("b", "y", "c", "y")]);

        let rotated = reassociate(&outer, AssocChoice::Right).expect("right-deep rotation should apply");
        assert_eq!(rotated.children[0].kind, NodeKind::Relation);
        assert_eq!(rotated.children[0].value.as_ident(), Some("a"));
        assert_eq!(rotated.children[1].kind, NodeKind::Join);
        // the a.x=b.x conjunct can't live on the new inner join(b,c), so it
        // stays on the new outer join.
        assert!(rotated.children.len() == 3 || rotated.children[1].children.len() == 3);
    }

    #[test]
    fn reassociate_is_noop_when_choice_is_none() {
        let inner = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![relation("a"), relation("b"), eq_cond("a", "x", "b", "x")]);
        let outer = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![inner, relation("c"), eq_cond("b", "y", "c", "y")]);
        assert!(reassociate(&outer, AssocChoice::None).is_none());
    }

    #[test]
    fn reassociate_is_noop_when_shape_already_matches() {
        let inner = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![relation("a"), relation("b"), eq_cond("a", "x", "b", "x")]);
        let outer = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![inner, relation("c"), eq_cond("b", "y", "c", "y")]);
        assert!(reassociate(&outer, AssocChoice::Left).is_none());
    }
}
