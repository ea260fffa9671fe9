//! Block Storage: table CRUD on rows plus the schema catalog.
//!
//! ## Storage format
//!
//! ```text
//! data/
//! ├── catalog.json      # table schemas + index descriptors
//! └── tables/
//!     ├── users.dat     # one JSON row per line
//!     └── orders.dat
//! ```
//!
//! Each `.dat` file holds one row per line as a JSON object; the catalog
//! holds schemas and index descriptors. Writes go through a temp file and an
//! atomic rename so a crash mid-write never leaves a half-written table.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::types::{IndexMetadata, Row, Statistic, TableSchema, Value};

pub const ROWS_PER_BLOCK: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn matches(&self, row_value: &Value) -> bool {
        match self.op {
            CompareOp::Eq => row_value == &self.value,
            CompareOp::Ne => !(row_value == &self.value),
            CompareOp::Lt => matches!(row_value.partial_cmp(&self.value), Some(std::cmp::Ordering::Less)),
            CompareOp::Le => matches!(
                row_value.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ),
            CompareOp::Gt => matches!(row_value.partial_cmp(&self.value), Some(std::cmp::Ordering::Greater)),
            CompareOp::Ge => matches!(
                row_value.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            CompareOp::Like => match &self.value {
                Value::String(pattern) => row_value.like(pattern),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub table: String,
    pub columns: Vec<String>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropBehavior {
    Cascade,
    Restrict,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Catalog {
    tables: HashMap<String, TableSchema>,
    indexes: HashMap<String, IndexMetadata>,
}

#[derive(Debug)]
struct TableData {
    schema: TableSchema,
    rows: HashMap<u64, Row>,
    next_row_id: u64,
}

impl TableData {
    fn new(schema: TableSchema) -> Self {
        Self { schema, rows: HashMap::new(), next_row_id: 1 }
    }
}

/// The row-oriented block store: table CRUD plus the schema catalog, behind
/// a single `RwLock` map keyed by table name (the concurrency manager, not
/// this layer, governs cross-transaction isolation; this lock only protects
/// the in-memory structure itself from torn reads/writes).
pub struct StorageEngine {
    data_dir: PathBuf,
    tables: Arc<RwLock<HashMap<String, TableData>>>,
    catalog: Arc<RwLock<Catalog>>,
}

impl StorageEngine {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(data_dir.join("tables"))?;

        let engine = Self {
            data_dir,
            tables: Arc::new(RwLock::new(HashMap::new())),
            catalog: Arc::new(RwLock::new(Catalog::default())),
        };
        engine.load_catalog()?;
        engine.load_tables()?;
        Ok(engine)
    }

    fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    fn table_path(&self, table_name: &str) -> PathBuf {
        self.data_dir.join("tables").join(format!("{}.dat", table_name))
    }

    fn validate_table_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(DbError::schema(format!("invalid table name '{}'", name)));
        }
        Ok(())
    }

    fn load_catalog(&self) -> Result<()> {
        let path = self.catalog_path();
        if path.exists() {
            let file = File::open(&path)?;
            let catalog: Catalog = serde_json::from_reader(file)?;
            *self.catalog.write().unwrap() = catalog;
        }
        Ok(())
    }

    fn save_catalog(&self) -> Result<()> {
        let path = self.catalog_path();
        let temp_path = path.with_extension("json.tmp");
        let catalog = self.catalog.read().unwrap();
        let file = File::create(&temp_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &*catalog)?;
        fs::rename(temp_path, path)?;
        Ok(())
    }

    fn load_tables(&self) -> Result<()> {
        let catalog = self.catalog.read().unwrap();
        let mut tables = self.tables.write().unwrap();
        for (name, schema) in &catalog.tables {
            let mut data = TableData::new(schema.clone());
            let path = self.table_path(name);
            if path.exists() {
                let reader = BufReader::new(File::open(&path)?);
                for line in reader.lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let row: Row = serde_json::from_str(&line)?;
                    data.next_row_id = data.next_row_id.max(row.id + 1);
                    data.rows.insert(row.id, row);
                }
            }
            tables.insert(name.clone(), data);
        }
        Ok(())
    }

    fn save_table(&self, table_name: &str) -> Result<()> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;
        let path = self.table_path(table_name);
        let temp_path = path.with_extension("dat.tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let mut ids: Vec<_> = table.rows.keys().collect();
        ids.sort();
        for id in ids {
            let row = &table.rows[id];
            writeln!(writer, "{}", serde_json::to_string(row)?)?;
        }
        writer.flush()?;
        fs::rename(temp_path, path)?;
        Ok(())
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        Self::validate_table_name(&schema.name)?;
        if schema.columns.is_empty() {
            return Err(DbError::schema("a table must have at least one column"));
        }
        let mut catalog = self.catalog.write().unwrap();
        let mut tables = self.tables.write().unwrap();
        if catalog.tables.contains_key(&schema.name) {
            return Err(DbError::table_exists(&schema.name));
        }
        for fk in &schema.foreign_keys {
            let referenced = catalog
                .tables
                .get(&fk.ref_table)
                .ok_or_else(|| DbError::schema(format!("foreign key references unknown table '{}'", fk.ref_table)))?;
            if referenced.find_column(&fk.ref_column).is_none() {
                return Err(DbError::schema(format!(
                    "foreign key references unknown column '{}.{}'",
                    fk.ref_table, fk.ref_column
                )));
            }
        }
        catalog.tables.insert(schema.name.clone(), schema.clone());
        tables.insert(schema.name.clone(), TableData::new(schema));
        drop(catalog);
        drop(tables);
        self.save_catalog()
    }

    pub fn drop_table(&self, table_name: &str, behavior: DropBehavior) -> Result<()> {
        let mut catalog = self.catalog.write().unwrap();
        if !catalog.tables.contains_key(table_name) {
            return Err(DbError::table_not_found(table_name));
        }
        if behavior == DropBehavior::Restrict {
            let referencing: Vec<&str> = catalog
                .tables
                .values()
                .filter(|t| t.name != table_name && t.foreign_keys.iter().any(|fk| fk.ref_table == table_name))
                .map(|t| t.name.as_str())
                .collect();
            if !referencing.is_empty() {
                return Err(DbError::schema(format!(
                    "cannot drop '{}': referenced by {:?} (use CASCADE)",
                    table_name, referencing
                )));
            }
        }
        catalog.tables.remove(table_name);
        catalog.indexes.retain(|_, idx| idx.table != table_name);
        self.tables.write().unwrap().remove(table_name);
        let path = self.table_path(table_name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        drop(catalog);
        self.save_catalog()
    }

    pub fn get_schema(&self, table_name: &str) -> Result<TableSchema> {
        self.catalog
            .read()
            .unwrap()
            .tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| DbError::table_not_found(table_name))
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        self.catalog.read().unwrap().tables.contains_key(table_name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<_> = self.catalog.read().unwrap().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Projects `row` down to `columns` (`["*"]` means all columns), in
    /// schema order regardless of the order requested.
    fn project(schema: &TableSchema, row: &Row, columns: &[String]) -> Result<Vec<Value>> {
        if columns.len() == 1 && columns[0] == "*" {
            return Ok(row.values.clone());
        }
        columns
            .iter()
            .map(|name| {
                let idx = schema.find_column(name).ok_or_else(|| DbError::unknown_column(name))?;
                Ok(row.values[idx].clone())
            })
            .collect()
    }

    pub fn read_block(&self, request: &ReadRequest) -> Result<Vec<Row>> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(&request.table).ok_or_else(|| DbError::table_not_found(&request.table))?;

        let mut condition_idx = Vec::with_capacity(request.conditions.len());
        for cond in &request.conditions {
            let idx = table
                .schema
                .find_column(&cond.column)
                .ok_or_else(|| DbError::unknown_column(&cond.column))?;
            condition_idx.push(idx);
        }

        let mut ids: Vec<_> = table.rows.keys().copied().collect();
        ids.sort_unstable();

        let mut out = Vec::new();
        for id in ids {
            let row = &table.rows[&id];
            let matches = request
                .conditions
                .iter()
                .zip(&condition_idx)
                .all(|(cond, &idx)| cond.matches(&row.values[idx]));
            if matches {
                let projected = Self::project(&table.schema, row, &request.columns)?;
                out.push(Row::new(row.id, projected));
            }
        }
        Ok(out)
    }

    pub fn write_block(&self, table_name: &str, rows: Vec<Vec<Value>>, mode: WriteMode) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;

        if mode == WriteMode::Replace {
            table.rows.clear();
        }

        let mut written = 0u64;
        for values in rows {
            if values.len() != table.schema.columns.len() {
                return Err(DbError::schema(format!(
                    "expected {} values for table '{}', got {}",
                    table.schema.columns.len(),
                    table_name,
                    values.len()
                )));
            }
            let id = table.next_row_id;
            table.next_row_id += 1;
            table.rows.insert(id, Row::new(id, values));
            written += 1;
        }
        drop(tables);
        self.save_table(table_name)?;
        Ok(written)
    }

    /// Reserves the next row ID for `table_name` without inserting anything,
    /// so a caller that must log a row's identity (the recovery log) before
    /// the row actually reaches storage (a buffered insert) can assign it
    /// once and have it stick through `insert_rows` later.
    pub fn reserve_row_id(&self, table_name: &str) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;
        let id = table.next_row_id;
        table.next_row_id += 1;
        Ok(id)
    }

    /// Inserts rows that already carry the ID assigned by `reserve_row_id`,
    /// so a WAL record or undo step logged before the flush stays valid
    /// after it. Unlike `write_block`, never assigns its own IDs.
    pub fn insert_rows(&self, table_name: &str, rows: Vec<Row>) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;
        let mut written = 0u64;
        for row in rows {
            if row.values.len() != table.schema.columns.len() {
                return Err(DbError::schema(format!(
                    "expected {} values for table '{}', got {}",
                    table.schema.columns.len(),
                    table_name,
                    row.values.len()
                )));
            }
            table.next_row_id = table.next_row_id.max(row.id + 1);
            table.rows.insert(row.id, row);
            written += 1;
        }
        drop(tables);
        self.save_table(table_name)?;
        Ok(written)
    }

    /// Batched update keyed on full row match: every stored row equal to an
    /// `old_row` in a pair is replaced by the paired `new_row`. Rows with no
    /// matching `old_row` are left untouched.
    pub fn update_by_old_new(&self, table_name: &str, pairs: &[(Vec<Value>, Vec<Value>)]) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;

        let mut updated = 0u64;
        for (old, new) in pairs {
            if let Some(id) = table.rows.iter().find(|(_, r)| &r.values == old).map(|(id, _)| *id) {
                table.rows.insert(id, Row::new(id, new.clone()));
                updated += 1;
            }
        }
        drop(tables);
        self.save_table(table_name)?;
        Ok(updated)
    }

    pub fn delete_block(&self, table_name: &str, conditions: &[Condition]) -> Result<u64> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;

        let mut condition_idx = Vec::with_capacity(conditions.len());
        for cond in conditions {
            let idx = table.schema.find_column(&cond.column).ok_or_else(|| DbError::unknown_column(&cond.column))?;
            condition_idx.push(idx);
        }

        let doomed: Vec<u64> = table
            .rows
            .iter()
            .filter(|(_, row)| conditions.iter().zip(&condition_idx).all(|(cond, &idx)| cond.matches(&row.values[idx])))
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            table.rows.remove(id);
        }
        let deleted = doomed.len() as u64;
        drop(tables);
        self.save_table(table_name)?;
        Ok(deleted)
    }

    /// Restores a single row with its original ID, used by undo replay to
    /// reinsert a deleted row or reinstate the pre-image of an update.
    pub fn restore_row(&self, table_name: &str, row: Row) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;
        table.next_row_id = table.next_row_id.max(row.id + 1);
        table.rows.insert(row.id, row);
        drop(tables);
        self.save_table(table_name)
    }

    /// Removes a single row by ID, used by undo replay to retract an
    /// inserted row.
    pub fn remove_row(&self, table_name: &str, row_id: u64) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;
        table.rows.remove(&row_id);
        drop(tables);
        self.save_table(table_name)
    }

    pub fn create_index(&self, index: IndexMetadata) -> Result<()> {
        let mut catalog = self.catalog.write().unwrap();
        if !catalog.tables.contains_key(&index.table) {
            return Err(DbError::table_not_found(&index.table));
        }
        catalog.indexes.insert(index.name.clone(), index);
        drop(catalog);
        self.save_catalog()
    }

    pub fn list_indexes(&self, table_name: &str) -> Vec<IndexMetadata> {
        self.catalog.read().unwrap().indexes.values().filter(|i| i.table == table_name).cloned().collect()
    }

    /// Computes fresh statistics by scanning the table: row count, block
    /// count (rows divided by a fixed per-block constant), and per-column
    /// distinct-value counts. Staleness between calls is acceptable per the
    /// optimizer's contract.
    pub fn get_stats(&self, table_name: &str) -> Result<Statistic> {
        let tables = self.tables.read().unwrap();
        let table = tables.get(table_name).ok_or_else(|| DbError::table_not_found(table_name))?;

        let row_count = table.rows.len() as u64;
        let block_count = (row_count + ROWS_PER_BLOCK - 1) / ROWS_PER_BLOCK.max(1);

        let mut distinct_values = HashMap::new();
        for (col_idx, col) in table.schema.columns.iter().enumerate() {
            let mut seen = std::collections::HashSet::new();
            for row in table.rows.values() {
                seen.insert(crate::types::ValueKey::from(row.values[col_idx].clone()));
            }
            distinct_values.insert(col.name.clone(), seen.len() as u64);
        }

        Ok(Statistic { row_count, block_count: block_count.max(1), distinct_values, indexes: self.list_indexes(table_name) })
    }
}

impl Clone for StorageEngine {
    fn clone(&self) -> Self {
        Self { data_dir: self.data_dir.clone(), tables: Arc::clone(&self.tables), catalog: Arc::clone(&self.catalog) }
    }
}
