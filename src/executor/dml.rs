//! INSERT/UPDATE/DELETE execution: resolves a lowered DML tree node into
//! `BufferedOperation`s and hands them to the coordinator, which owns the
//! WAL-write/buffer/checkpoint sequencing.

use crate::concurrency::{LockMode, TxnId};
use crate::coordinator::{BufferedOperation, Coordinator, OpKind};
use crate::error::{DbError, Result};
use crate::tree::Node;
use crate::types::{Row, TableSchema, Value};

use super::evaluator;

pub fn execute_insert(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<u64> {
    let table = node.children[0].value.as_ident().ok_or_else(|| DbError::internal("insert missing a table name"))?;
    coordinator.validate_access(tid, table, LockMode::Write)?;
    let schema = coordinator.storage.get_schema(table)?;

    let columns: Vec<String> = node.children[1].children.iter().filter_map(|c| c.value.as_ident().map(String::from)).collect();
    let value_exprs = &node.children[2].children;

    let values = if columns.is_empty() {
        if value_exprs.len() != schema.columns.len() {
            return Err(DbError::schema(format!(
                "table '{}' has {} columns, but {} values were supplied",
                table,
                schema.columns.len(),
                value_exprs.len()
            )));
        }
        value_exprs.iter().map(|e| evaluator::eval(e, None)).collect::<Result<Vec<_>>>()?
    } else {
        build_values_by_column_list(&schema, &columns, value_exprs)?
    };

    let id = coordinator.storage.reserve_row_id(table)?;
    let row = Row::new(id, values);
    coordinator.record_write(
        tid,
        BufferedOperation { kind: OpKind::Insert, table: table.to_string(), old_row: None, new_row: Some(row) },
    )?;
    Ok(1)
}

fn build_values_by_column_list(schema: &TableSchema, columns: &[String], value_exprs: &[Node]) -> Result<Vec<Value>> {
    if columns.len() != value_exprs.len() {
        return Err(DbError::schema("column list and value list have different lengths"));
    }
    let mut values = vec![Value::Null; schema.columns.len()];
    let mut filled = vec![false; schema.columns.len()];
    for (col_name, expr) in columns.iter().zip(value_exprs) {
        let idx = schema.find_column(col_name).ok_or_else(|| DbError::unknown_column(col_name))?;
        values[idx] = evaluator::eval(expr, None)?;
        filled[idx] = true;
    }
    for (idx, col) in schema.columns.iter().enumerate() {
        if !filled[idx] && !col.nullable {
            return Err(DbError::schema(format!("column '{}' has no default and was not supplied", col.name)));
        }
    }
    Ok(values)
}

pub fn execute_update(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<u64> {
    let table = node.children[0].value.as_ident().ok_or_else(|| DbError::internal("update missing a table name"))?;
    coordinator.validate_access(tid, table, LockMode::Write)?;
    let schema = coordinator.storage.get_schema(table)?;
    let names: Vec<&str> = schema.column_names();

    let assignments = &node.children[1].children;
    let cond = node.children.get(2);

    let mut affected = 0u64;
    for row in coordinator.read_with_buffer(tid, table)? {
        let tuple = evaluator::Tuple::new(table, &names, row.values.clone());
        let matches = match cond {
            Some(c) => evaluator::eval(c, Some(&tuple))?.is_truthy(),
            None => true,
        };
        if !matches {
            continue;
        }
        let mut new_values = row.values.clone();
        for assignment in assignments {
            let col_name = assignment.children[0].value.as_ident().ok_or_else(|| DbError::internal("assignment missing a column name"))?;
            let idx = schema.find_column(col_name).ok_or_else(|| DbError::unknown_column(col_name))?;
            new_values[idx] = evaluator::eval(&assignment.children[1], Some(&tuple))?;
        }
        let new_row = Row::new(row.id, new_values);
        coordinator.record_write(
            tid,
            BufferedOperation { kind: OpKind::Update, table: table.to_string(), old_row: Some(row), new_row: Some(new_row) },
        )?;
        affected += 1;
    }
    Ok(affected)
}

pub fn execute_delete(coordinator: &Coordinator, tid: TxnId, node: &Node) -> Result<u64> {
    let table = node.children[0].value.as_ident().ok_or_else(|| DbError::internal("delete missing a table name"))?;
    coordinator.validate_access(tid, table, LockMode::Write)?;
    let schema = coordinator.storage.get_schema(table)?;
    let names: Vec<&str> = schema.column_names();
    let cond = node.children.get(1);

    let mut affected = 0u64;
    for row in coordinator.read_with_buffer(tid, table)? {
        let matches = match cond {
            Some(c) => {
                let tuple = evaluator::Tuple::new(table, &names, row.values.clone());
                evaluator::eval(c, Some(&tuple))?.is_truthy()
            }
            None => true,
        };
        if !matches {
            continue;
        }
        coordinator.record_write(
            tid,
            BufferedOperation { kind: OpKind::Delete, table: table.to_string(), old_row: Some(row), new_row: None },
        )?;
        affected += 1;
    }
    Ok(affected)
}

