//! CREATE/DROP TABLE execution. Schema changes aren't buffered or
//! WAL-logged; they run immediately under the concurrency manager's
//! exclusive-table path and take effect as soon as `Coordinator` returns.

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::parser::{CreateTableStmt, DropBehavior as AstDropBehavior, DropTableStmt};
use crate::storage::DropBehavior;
use crate::types::{ColumnDef, ForeignKey, TableSchema};

pub fn create_table(coordinator: &Coordinator, client_id: u64, stmt: &CreateTableStmt) -> Result<()> {
    let columns: Vec<ColumnDef> = stmt
        .columns
        .iter()
        .map(|c| ColumnDef { name: c.name.clone(), data_type: c.data_type.clone(), nullable: !c.primary_key, primary_key: c.primary_key })
        .collect();
    let foreign_keys: Vec<ForeignKey> = stmt
        .columns
        .iter()
        .filter_map(|c| {
            c.foreign_key.as_ref().map(|(ref_table, ref_column)| ForeignKey {
                column: c.name.clone(),
                ref_table: ref_table.clone(),
                ref_column: ref_column.clone(),
            })
        })
        .collect();
    let schema = TableSchema { name: stmt.table_name.clone(), columns, foreign_keys };
    coordinator.with_exclusive_table(client_id, &stmt.table_name, || coordinator.storage.create_table(schema))
}

pub fn drop_table(coordinator: &Coordinator, client_id: u64, stmt: &DropTableStmt) -> Result<()> {
    let behavior = match stmt.behavior {
        AstDropBehavior::Cascade => DropBehavior::Cascade,
        AstDropBehavior::Restrict => DropBehavior::Restrict,
    };
    coordinator.with_exclusive_table(client_id, &stmt.table_name, || coordinator.storage.drop_table(&stmt.table_name, behavior))
}
