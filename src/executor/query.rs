//! SELECT execution: interprets a materialized physical plan tree into rows,
//! dispatching join method per the `"KIND|METHOD"` tag the optimizer stamps
//! onto each `Join` node.

use std::collections::HashMap;

use crate::coordinator::Coordinator;
use crate::concurrency::{LockMode, TxnId};
use crate::error::{DbError, Result};
use crate::tree::{Node, NodeKind, NodeValue};
use crate::types::{DataType, ResultSet, Value, ValueKey};

use super::evaluator::{self, Tuple};

pub fn execute_select(coordinator: &Coordinator, tid: TxnId, plan: &Node) -> Result<ResultSet> {
    to_result_set(coordinator, tid, plan)
}

fn to_result_set(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<ResultSet> {
    match node.kind {
        NodeKind::Limit => {
            let mut rs = to_result_set(coordinator, tid, &node.children[0])?;
            if let NodeValue::Int(n) = node.value {
                rs.rows.truncate(n.max(0) as usize);
            }
            Ok(rs)
        }
        NodeKind::Project => project(coordinator, tid, node),
        other => Err(DbError::internal(format!("expected a projected plan, found {:?}", other))),
    }
}

fn project(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<ResultSet> {
    let tuples = interpret(coordinator, tid, &node.children[0])?;
    let star = matches!(&node.value, NodeValue::Op(tag) if tag == "*");

    if star {
        let headers = header_names(&tuples);
        let mut rs = ResultSet::new(headers, infer_types(&tuples));
        for t in &tuples {
            rs.add_row(t.values.clone());
        }
        return Ok(rs);
    }

    let exprs = &node.children[1..];
    let headers: Vec<String> = exprs.iter().map(label_for).collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); exprs.len()];
    for t in &tuples {
        for (i, e) in exprs.iter().enumerate() {
            let (expr, _alias) = match e.kind {
                NodeKind::Alias => (&e.children[0], Some(&e.value)),
                _ => (e, None),
            };
            columns[i].push(evaluator::eval(expr, Some(t))?);
        }
    }
    let mut rs = ResultSet::new(headers, columns.iter().map(|c| infer_column_type(c)).collect());
    for row_idx in 0..tuples.len() {
        rs.add_row(columns.iter().map(|c| c[row_idx].clone()).collect());
    }
    Ok(rs)
}

fn label_for(node: &Node) -> String {
    match node.kind {
        NodeKind::Alias => node.value.as_ident().unwrap_or("col").to_string(),
        NodeKind::ColumnName => node.value.as_ident().unwrap_or("col").to_string(),
        NodeKind::ColumnRef => node.children[0].value.as_ident().unwrap_or("col").to_string(),
        _ => "expr".to_string(),
    }
}

fn header_names(tuples: &[Tuple]) -> Vec<String> {
    let Some(first) = tuples.first() else { return vec![] };
    let qualifiers: std::collections::HashSet<&str> = first.columns.iter().map(|(q, _)| q.as_str()).collect();
    if qualifiers.len() > 1 {
        first.columns.iter().map(|(q, n)| format!("{}.{}", q, n)).collect()
    } else {
        first.columns.iter().map(|(_, n)| n.clone()).collect()
    }
}

fn infer_types(tuples: &[Tuple]) -> Vec<DataType> {
    let width = tuples.first().map(|t| t.values.len()).unwrap_or(0);
    (0..width).map(|i| infer_column_type(&tuples.iter().map(|t| t.values[i].clone()).collect::<Vec<_>>())).collect()
}

fn infer_column_type(values: &[Value]) -> DataType {
    values
        .iter()
        .find(|v| !v.is_null())
        .map(|v| match v {
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) => DataType::Varchar(None),
            Value::Null => DataType::Varchar(None),
        })
        .unwrap_or(DataType::Varchar(None))
}

/// Interprets the relational part of the plan (everything under `Project`)
/// into row tuples: scans, filters, sorts, and joins.
fn interpret(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<Vec<Tuple>> {
    match node.kind {
        NodeKind::Relation => {
            let table = node.value.as_ident().ok_or_else(|| DbError::internal("relation missing a table name"))?;
            coordinator.validate_access(tid, table, LockMode::Read)?;
            let schema = coordinator.storage.get_schema(table)?;
            let names: Vec<&str> = schema.column_names();
            let rows = coordinator.read_with_buffer(tid, table)?;
            Ok(rows.into_iter().map(|r| Tuple::new(table, &names, r.values)).collect())
        }
        NodeKind::Alias => {
            let alias = node.value.as_ident().ok_or_else(|| DbError::internal("alias missing a name"))?.to_string();
            let inner = interpret(coordinator, tid, &node.children[0])?;
            Ok(inner.into_iter().map(|t| t.relabel(&alias)).collect())
        }
        NodeKind::Filter => {
            let source = interpret(coordinator, tid, &node.children[0])?;
            let cond = &node.children[1];
            let mut out = Vec::with_capacity(source.len());
            for t in source {
                if evaluator::eval(cond, Some(&t))?.is_truthy() {
                    out.push(t);
                }
            }
            Ok(out)
        }
        NodeKind::Sort => {
            let mut rows = interpret(coordinator, tid, &node.children[0])?;
            let item = &node.children[1];
            let desc = matches!(&item.value, NodeValue::Op(d) if d == "DESC");
            let col = item.children[0].value.as_ident().unwrap_or("").to_string();
            rows.sort_by(|a, b| {
                let av = a.get(None, &col);
                let bv = b.get(None, &col);
                let ord = av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal);
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
            Ok(rows)
        }
        NodeKind::Join => interpret_join(coordinator, tid, node),
        other => Err(DbError::internal(format!("{:?} cannot appear under a projection", other))),
    }
}

fn interpret_join(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<Vec<Tuple>> {
    let left = interpret(coordinator, tid, &node.children[0])?;
    let right = interpret(coordinator, tid, &node.children[1])?;
    if left.is_empty() || right.is_empty() {
        return Ok(vec![]);
    }

    let tag = node.value.as_op().unwrap_or("INNER|NESTED_LOOP");
    let mut parts = tag.splitn(2, '|');
    let kind = parts.next().unwrap_or("INNER");
    let method = parts.next().unwrap_or("NESTED_LOOP");

    if kind == "NATURAL" {
        let shared = shared_columns(&left[0], &right[0]);
        join_on_keys(left, right, &shared, method)
    } else {
        let cond = node.children.get(2).ok_or_else(|| DbError::internal("INNER JOIN missing its condition"))?;
        if method != "NESTED_LOOP" {
            if let Some((left_expr, right_expr)) = extract_equi_condition(cond, &left[0], &right[0]) {
                return hash_join(left, right, &left_expr, &right_expr);
            }
        }
        nested_loop_join(left, right, cond)
    }
}

fn shared_columns(left0: &Tuple, right0: &Tuple) -> Vec<String> {
    let right_names: std::collections::HashSet<String> =
        right0.columns.iter().map(|(_, n)| n.to_lowercase()).collect();
    left0
        .columns
        .iter()
        .map(|(_, n)| n.clone())
        .filter(|n| right_names.contains(&n.to_lowercase()))
        .collect()
}

fn join_on_keys(left: Vec<Tuple>, right: Vec<Tuple>, shared: &[String], method: &str) -> Result<Vec<Tuple>> {
    if shared.is_empty() {
        // No shared columns: a NATURAL join degenerates to the cross product.
        return nested_loop_predicate(left, right, |_, _| Ok(true));
    }
    if method == "NESTED_LOOP" {
        let shared = shared.to_vec();
        return nested_loop_predicate(left, right, move |l, r| Ok(rows_match_on(l, r, &shared)));
    }
    let mut buckets: HashMap<Vec<ValueKey>, Vec<Tuple>> = HashMap::new();
    for r in right {
        let key: Vec<ValueKey> = shared.iter().map(|c| ValueKey::from(r.get(None, c).cloned().unwrap_or(Value::Null))).collect();
        buckets.entry(key).or_default().push(r);
    }
    let mut out = Vec::new();
    for l in left {
        let key: Vec<ValueKey> = shared.iter().map(|c| ValueKey::from(l.get(None, c).cloned().unwrap_or(Value::Null))).collect();
        if let Some(matches) = buckets.get(&key) {
            for r in matches {
                out.push(l.clone().concat(r.clone()));
            }
        }
    }
    Ok(out)
}

fn rows_match_on(l: &Tuple, r: &Tuple, shared: &[String]) -> bool {
    shared.iter().all(|c| l.get(None, c) == r.get(None, c))
}

fn nested_loop_predicate(left: Vec<Tuple>, right: Vec<Tuple>, pred: impl Fn(&Tuple, &Tuple) -> Result<bool>) -> Result<Vec<Tuple>> {
    let mut out = Vec::new();
    for l in &left {
        for r in &right {
            if pred(l, r)? {
                out.push(l.clone().concat(r.clone()));
            }
        }
    }
    Ok(out)
}

fn nested_loop_join(left: Vec<Tuple>, right: Vec<Tuple>, cond: &Node) -> Result<Vec<Tuple>> {
    nested_loop_predicate(left, right, |l, r| {
        let combined = l.clone().concat(r.clone());
        Ok(evaluator::eval(cond, Some(&combined))?.is_truthy())
    })
}

/// Builds a hash table on `right` keyed by `right_expr`, then probes it with
/// `left_expr` evaluated per left tuple, for the join method an equality
/// condition the optimizer tagged `HASH` or `INDEX_NESTED_LOOP`. A real
/// index structure backing the inner side is future work; this gives the
/// same equality-key shortcut an index lookup would, without one.
fn hash_join(left: Vec<Tuple>, right: Vec<Tuple>, left_expr: &Node, right_expr: &Node) -> Result<Vec<Tuple>> {
    let mut buckets: HashMap<ValueKey, Vec<Tuple>> = HashMap::new();
    for r in right {
        let key = ValueKey::from(evaluator::eval(right_expr, Some(&r))?);
        buckets.entry(key).or_default().push(r);
    }
    let mut out = Vec::new();
    for l in left {
        let key = ValueKey::from(evaluator::eval(left_expr, Some(&l))?);
        if let Some(matches) = buckets.get(&key) {
            for r in matches {
                out.push(l.clone().concat(r.clone()));
            }
        }
    }
    Ok(out)
}

/// If `cond` is a single equality comparison where one side resolves
/// against `left0` only and the other against `right0` only, returns
/// `(left_side_expr, right_side_expr)` in that order.
fn extract_equi_condition<'a>(cond: &'a Node, left0: &Tuple, right0: &Tuple) -> Option<(&'a Node, &'a Node)> {
    if cond.kind != NodeKind::Comparison || cond.value.as_op() != Some("=") {
        return None;
    }
    let a = &cond.children[0];
    let b = &cond.children[1];
    let a_left = evaluator::eval(a, Some(left0)).is_ok();
    let a_right = evaluator::eval(a, Some(right0)).is_ok();
    let b_left = evaluator::eval(b, Some(left0)).is_ok();
    let b_right = evaluator::eval(b, Some(right0)).is_ok();

    if a_left && !a_right && b_right && !b_left {
        Some((a, b))
    } else if a_right && !a_left && b_left && !b_right {
        Some((b, a))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::Variant;
    use crate::types::{ColumnDef, TableSchema};

    fn setup() -> (tempfile::TempDir, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::open(dir.path().to_path_buf(), Variant::WaitDie, 1000).unwrap();
        c.storage
            .create_table(TableSchema {
                name: "t".into(),
                columns: vec![
                    ColumnDef { name: "id".into(), data_type: DataType::Integer, nullable: false, primary_key: true },
                    ColumnDef { name: "age".into(), data_type: DataType::Integer, nullable: true, primary_key: false },
                ],
                foreign_keys: vec![],
            })
            .unwrap();
        c.storage
            .write_block(
                "t",
                vec![
                    vec![Value::Integer(1), Value::Integer(30)],
                    vec![Value::Integer(2), Value::Integer(20)],
                ],
                crate::storage::WriteMode::Append,
            )
            .unwrap();
        (dir, c)
    }

    #[test]
    fn select_star_with_filter_and_sort() {
        let (_dir, c) = setup();
        let tree = crate::planner::plan("SELECT * FROM t WHERE age > 10 ORDER BY age DESC;").unwrap();
        let optimized = crate::optimizer::optimize(
            &tree,
            &crate::executor::StorageStats(&c.storage),
            crate::optimizer::GeneticConfig { population: 4, generations: 2, ..Default::default() },
        );
        let tid = c.cc.begin(1);
        let rs = execute_select(&c, tid, &optimized).unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][1], Value::Integer(30));
    }
}
