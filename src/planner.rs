//! Lowers the parsed AST (`crate::parser`) into the algebraic tree
//! (`crate::tree`) the optimizer and executor share. The SQL front end is a
//! thin external collaborator to the core; this module is the seam between
//! the two.

use crate::error::Result;
use crate::parser::{self, BinaryOperator, Expr, JoinType, SelectColumn, SelectStmt, SortOrder, Statement};
use crate::tree::{validate, Node, NodeKind, NodeValue};
use crate::types::DataType;

pub fn plan(sql: &str) -> Result<Node> {
    let stmt = parser::Parser::parse(sql)?;
    plan_from_statement(&stmt)
}

/// Lowers an already-parsed statement, for callers (the coordinator) that
/// need to inspect the `Statement` itself to dispatch control statements
/// (`BEGIN`/`COMMIT`/`ROLLBACK`/`CHECKPOINT`) before reaching for a plan.
pub fn plan_from_statement(stmt: &Statement) -> Result<Node> {
    let node = lower_statement(stmt);
    validate(&node).map_err(crate::error::DbError::parse)?;
    Ok(node)
}

fn lower_statement(stmt: &Statement) -> Node {
    match stmt {
        Statement::Select(s) => lower_select(s),
        Statement::Insert(ins) => {
            let table = Node::leaf(NodeKind::TableName, NodeValue::Ident(ins.table_name.clone()));
            let columns = ins
                .columns
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|c| Node::leaf(NodeKind::ColumnName, NodeValue::Ident(c)))
                .collect();
            let column_list = Node::new(NodeKind::List, NodeValue::None, columns);
            let values = ins.values.iter().map(lower_expr).collect();
            let value_list = Node::new(NodeKind::List, NodeValue::None, values);
            Node::new(NodeKind::InsertQuery, NodeValue::None, vec![table, column_list, value_list])
        }
        Statement::Update(upd) => {
            let table = Node::leaf(NodeKind::TableName, NodeValue::Ident(upd.table_name.clone()));
            let assignments = upd
                .assignments
                .iter()
                .map(|(col, expr)| {
                    let c = Node::leaf(NodeKind::ColumnName, NodeValue::Ident(col.clone()));
                    let v = lower_expr(expr);
                    Node::new(NodeKind::Assignment, NodeValue::None, vec![c, v])
                })
                .collect();
            let assignment_list = Node::new(NodeKind::List, NodeValue::None, assignments);
            let mut children = vec![table, assignment_list];
            if let Some(w) = &upd.where_clause {
                children.push(lower_expr(w));
            }
            Node::new(NodeKind::UpdateQuery, NodeValue::None, children)
        }
        Statement::Delete(del) => {
            let table = Node::leaf(NodeKind::TableName, NodeValue::Ident(del.table_name.clone()));
            let mut children = vec![table];
            if let Some(w) = &del.where_clause {
                children.push(lower_expr(w));
            }
            Node::new(NodeKind::DeleteQuery, NodeValue::None, children)
        }
        Statement::CreateTable(ct) => {
            let table = Node::leaf(NodeKind::TableName, NodeValue::Ident(ct.table_name.clone()));
            let mut children = vec![table];
            for col in &ct.columns {
                children.push(lower_column_def(col));
            }
            Node::new(NodeKind::CreateTable, NodeValue::None, children)
        }
        Statement::DropTable(dt) => {
            let table = Node::leaf(NodeKind::TableName, NodeValue::Ident(dt.table_name.clone()));
            Node::new(NodeKind::DropTable, NodeValue::Op(format!("{:?}", dt.behavior)), vec![table])
        }
        Statement::Begin => Node::leaf(NodeKind::BeginTransaction, NodeValue::None),
        Statement::Commit => Node::leaf(NodeKind::Commit, NodeValue::None),
        // Rollback/Checkpoint are coordinator-level control statements with no
        // algebraic shape of their own; the coordinator dispatches on the
        // parsed `Statement` directly for these, so they never reach here.
        Statement::Rollback | Statement::Checkpoint => {
            Node::leaf(NodeKind::Commit, NodeValue::Op("UNREACHABLE".into()))
        }
    }
}

fn lower_column_def(col: &parser::ColumnDefAst) -> Node {
    let name = Node::leaf(NodeKind::ColumnName, NodeValue::Ident(col.name.clone()));
    let type_tag = match &col.data_type {
        DataType::Integer => "INTEGER".to_string(),
        DataType::Float => "FLOAT".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Varchar(Some(n)) => format!("VARCHAR({})", n),
        DataType::Varchar(None) => "VARCHAR".to_string(),
    };
    let mut value = type_tag;
    if col.primary_key {
        value.push_str(" PRIMARY KEY");
    }
    if let Some((ref_table, ref_col)) = &col.foreign_key {
        value.push_str(&format!(" REFERENCES {}({})", ref_table, ref_col));
    }
    Node::new(NodeKind::ColumnDefNode, NodeValue::Op(value), vec![name])
}

fn lower_select(s: &SelectStmt) -> Node {
    let mut from = lower_table_ref(&s.from.name, s.from.alias.as_deref());

    for join in &s.joins {
        let right = lower_table_ref(&join.table.name, join.table.alias.as_deref());
        from = match join.join_type {
            JoinType::Natural => Node::new(NodeKind::Join, NodeValue::Op("NATURAL".into()), vec![from, right]),
            JoinType::Inner => {
                let cond = join
                    .on_condition
                    .as_ref()
                    .map(lower_expr)
                    .unwrap_or_else(|| Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true)));
                Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![from, right, cond])
            }
        };
    }

    let mut plan = from;

    if let Some(w) = &s.where_clause {
        let cond = lower_expr(w);
        plan = Node::new(NodeKind::Filter, NodeValue::None, vec![plan, cond]);
    }

    if let Some(ob) = &s.order_by {
        let item = Node::new(
            NodeKind::OrderItem,
            NodeValue::Op(if ob.direction == SortOrder::Desc { "DESC".into() } else { "ASC".into() }),
            vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident(ob.column.clone()))],
        );
        plan = Node::new(NodeKind::Sort, NodeValue::None, vec![plan, item]);
    }

    plan = lower_projection(&s.columns, plan);

    if let Some(n) = s.limit {
        plan = Node::new(NodeKind::Limit, NodeValue::Int(n as i64), vec![plan]);
    }

    plan
}

fn lower_table_ref(name: &str, alias: Option<&str>) -> Node {
    let relation = Node::leaf(NodeKind::Relation, NodeValue::Ident(name.to_string()));
    match alias {
        Some(a) => Node::new(NodeKind::Alias, NodeValue::Ident(a.to_string()), vec![relation]),
        None => relation,
    }
}

fn lower_projection(columns: &[SelectColumn], source: Node) -> Node {
    if columns.len() == 1 && matches!(columns[0], SelectColumn::Star) {
        return Node::new(NodeKind::Project, NodeValue::Op("*".into()), vec![source]);
    }
    let mut children = vec![source];
    for col in columns {
        if let SelectColumn::Expr { expr, alias } = col {
            let lowered = lower_expr(expr);
            children.push(match alias {
                Some(a) => Node::new(NodeKind::Alias, NodeValue::Ident(a.clone()), vec![lowered]),
                None => lowered,
            });
        }
    }
    Node::new(NodeKind::Project, NodeValue::None, children)
}

fn lower_expr(expr: &Expr) -> Node {
    match expr {
        Expr::Literal(v) => lower_literal(v),
        Expr::Column { table, name } => {
            let col = Node::leaf(NodeKind::ColumnName, NodeValue::Ident(name.clone()));
            match table {
                Some(t) => Node::new(NodeKind::ColumnRef, NodeValue::Ident(t.clone()), vec![col]),
                None => col,
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let l = lower_expr(left);
            let r = lower_expr(right);
            let (kind, sym) = binary_op_kind(*op);
            Node::new(kind, NodeValue::Op(sym.to_string()), vec![l, r])
        }
        Expr::And(terms) => {
            Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), terms.iter().map(lower_expr).collect())
        }
        Expr::Or(terms) => {
            Node::new(NodeKind::Operator, NodeValue::Op("OR".into()), terms.iter().map(lower_expr).collect())
        }
        Expr::Not(inner) => Node::new(NodeKind::Operator, NodeValue::Op("NOT".into()), vec![lower_expr(inner)]),
        Expr::IsNull(inner) => Node::new(NodeKind::IsNullExpr, NodeValue::None, vec![lower_expr(inner)]),
        Expr::IsNotNull(inner) => Node::new(NodeKind::IsNotNullExpr, NodeValue::None, vec![lower_expr(inner)]),
        Expr::Between { expr, low, high } => Node::new(
            NodeKind::BetweenExpr,
            NodeValue::None,
            vec![lower_expr(expr), lower_expr(low), lower_expr(high)],
        ),
        Expr::In { expr, values } => {
            let mut children = vec![lower_expr(expr)];
            children.extend(values.iter().map(lower_expr));
            Node::new(NodeKind::InExpr, NodeValue::None, children)
        }
        Expr::NotIn { expr, values } => {
            let mut children = vec![lower_expr(expr)];
            children.extend(values.iter().map(lower_expr));
            Node::new(NodeKind::NotInExpr, NodeValue::None, children)
        }
        Expr::Like { expr, pattern } => {
            Node::new(NodeKind::LikeExpr, NodeValue::None, vec![lower_expr(expr), lower_expr(pattern)])
        }
    }
}

fn binary_op_kind(op: BinaryOperator) -> (NodeKind, &'static str) {
    match op {
        BinaryOperator::Equal => (NodeKind::Comparison, "="),
        BinaryOperator::NotEqual => (NodeKind::Comparison, "<>"),
        BinaryOperator::LessThan => (NodeKind::Comparison, "<"),
        BinaryOperator::LessThanOrEqual => (NodeKind::Comparison, "<="),
        BinaryOperator::GreaterThan => (NodeKind::Comparison, ">"),
        BinaryOperator::GreaterThanOrEqual => (NodeKind::Comparison, ">="),
        BinaryOperator::Plus => (NodeKind::ArithExpr, "+"),
        BinaryOperator::Minus => (NodeKind::ArithExpr, "-"),
        BinaryOperator::Multiply => (NodeKind::ArithExpr, "*"),
        BinaryOperator::Divide => (NodeKind::ArithExpr, "/"),
    }
}

fn lower_literal(v: &crate::types::Value) -> Node {
    use crate::types::Value;
    match v {
        Value::Null => Node::leaf(NodeKind::LiteralNull, NodeValue::None),
        Value::Integer(i) => Node::leaf(NodeKind::LiteralNumber, NodeValue::Int(*i)),
        Value::Float(f) => Node::leaf(NodeKind::LiteralNumber, NodeValue::Float(*f)),
        Value::String(s) => Node::leaf(NodeKind::LiteralString, NodeValue::Str(s.clone())),
        Value::Boolean(b) => Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(*b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_star_with_where_becomes_filter_under_project() {
        let tree = plan("SELECT * FROM users WHERE age > 18;").unwrap();
        assert_eq!(tree.kind, NodeKind::Project);
        assert_eq!(tree.children[0].kind, NodeKind::Filter);
    }

    #[test]
    fn join_on_condition_has_three_children() {
        let tree = plan("SELECT * FROM a JOIN b ON a.id = b.a_id;").unwrap();
        let join = &tree.children[0];
        assert_eq!(join.kind, NodeKind::Join);
        assert_eq!(join.children.len(), 3);
    }

    #[test]
    fn natural_join_has_two_children() {
        let tree = plan("SELECT * FROM a NATURAL JOIN b;").unwrap();
        let join = &tree.children[0];
        assert_eq!(join.children.len(), 2);
    }

    #[test]
    fn insert_lowers_to_insert_query_with_three_lists() {
        let tree = plan("INSERT INTO t (a, b) VALUES (1, 'x');").unwrap();
        assert_eq!(tree.kind, NodeKind::InsertQuery);
        assert_eq!(tree.children.len(), 3);
    }

    #[test]
    fn limit_wraps_the_projected_plan() {
        let tree = plan("SELECT * FROM t LIMIT 5;").unwrap();
        assert_eq!(tree.kind, NodeKind::Limit);
        assert_eq!(tree.children[0].kind, NodeKind::Project);
    }
}
