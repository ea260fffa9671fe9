//! Core scalar types for bedrockdb
//!
//! Defines the tagged value variant, table schemas, and rows that flow
//! between the storage layer, the executor, and the optimizer's statistics.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// SQL data types supported by bedrockdb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Varchar(Option<u32>),
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Varchar(Some(len)) => write!(f, "VARCHAR({})", len),
            DataType::Varchar(None) => write!(f, "VARCHAR"),
            DataType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// A scalar value: the tagged variant `{null, int, float, string, bool}`
/// prescribed by the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
        }
    }
}

impl Eq for Value {}

impl PartialEq for Value {
    /// NULL is not equal to anything, including itself. Numeric kinds widen
    /// int<->float before comparing; no other cross-kind coercion is
    /// attempted (cross-kind comparisons other than that widening are
    /// simply unequal, never an error).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Integer(b)) => *a == (*b as f64),
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "VARCHAR",
            Value::Boolean(_) => "BOOLEAN",
        }
    }

    /// LIKE matching: only leading/trailing `%` are special (substring match).
    pub fn like(&self, pattern: &str) -> bool {
        let s = match self {
            Value::String(s) => s.as_str(),
            _ => return false,
        };
        let leading = pattern.starts_with('%');
        let trailing = pattern.ends_with('%');
        let core = pattern.trim_start_matches('%').trim_end_matches('%');
        match (leading, trailing) {
            (true, true) => s.contains(core),
            (true, false) => s.ends_with(core),
            (false, true) => s.starts_with(core),
            (false, false) => s == core,
        }
    }
}

/// A column definition in a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// A foreign key constraint: `(column, referenced table, referenced column)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Index descriptor consulted by the optimizer's statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    Hash,
    BTree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub table: String,
    pub column: String,
    pub kind: IndexKind,
}

/// Table schema definition: ordered columns plus PK/FK constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }
}

/// A row of data: an internal row ID plus ordered values matching the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(id: u64, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    /// The row key used to identify this row across buffered operations:
    /// the primary-key value when the schema declares one, else the full
    /// ordered value tuple.
    pub fn key(&self, schema: &TableSchema) -> RowKey {
        match schema.primary_key_column() {
            Some(idx) => RowKey::Primary(ValueKey::from(self.values[idx].clone())),
            None => RowKey::FullRow(self.values.iter().cloned().map(ValueKey::from).collect()),
        }
    }
}

/// Row identity used to collapse buffered operations and key lock requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Primary(ValueKey),
    FullRow(Vec<ValueKey>),
}

/// `Value`'s `PartialEq` treats NULL as never equal to anything (correct SQL
/// comparison semantics), which is wrong for an identity key: a row's own
/// primary-key value must compare equal to itself in a HashMap. `ValueKey`
/// wraps `Value` with identity semantics instead.
#[derive(Debug, Clone)]
pub struct ValueKey(pub Value);

impl From<Value> for ValueKey {
    fn from(v: Value) -> Self {
        ValueKey(v)
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            _ => false,
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Row {
    pub fn row_key_of(id_col: Option<usize>, values: &[Value]) -> RowKey {
        match id_col {
            Some(idx) => RowKey::Primary(ValueKey::from(values[idx].clone())),
            None => RowKey::FullRow(values.iter().cloned().map(ValueKey::from).collect()),
        }
    }
}

/// Per-table statistics consulted by the optimizer.
#[derive(Debug, Clone)]
pub struct Statistic {
    /// n_r: row count
    pub row_count: u64,
    /// b_r: block count
    pub block_count: u64,
    /// V(a,r): distinct-value estimate per column, by column name
    pub distinct_values: std::collections::HashMap<String, u64>,
    /// Index descriptors available on this table
    pub indexes: Vec<IndexMetadata>,
}

/// Result set returned by a SELECT.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub column_types: Vec<DataType>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self { columns: vec![], column_types: vec![], rows: vec![] }
    }

    pub fn new(columns: Vec<String>, column_types: Vec<DataType>) -> Self {
        Self { columns, column_types, rows: vec![] }
    }

    pub fn add_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }
}

/// Outcome of executing one statement.
#[derive(Debug)]
pub enum QueryResult {
    Select(ResultSet),
    Modified { rows_affected: u64 },
    Ok,
    TransactionStarted,
    TransactionCommitted,
    TransactionRolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_equality_and_null_semantics() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Integer(2));
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Integer(0));
    }

    #[test]
    fn value_ordering() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Integer(1) < Value::Float(1.5));
        assert!(Value::Null < Value::Integer(1));
    }

    #[test]
    fn like_leading_trailing_percent() {
        let v = Value::String("hello world".into());
        assert!(v.like("%world"));
        assert!(v.like("hello%"));
        assert!(v.like("%lo wo%"));
        assert!(!v.like("%xyz"));
    }

    #[test]
    fn row_key_uses_primary_key_when_declared() {
        let schema = TableSchema {
            name: "t".into(),
            columns: vec![
                ColumnDef { name: "id".into(), data_type: DataType::Integer, nullable: false, primary_key: true },
                ColumnDef { name: "v".into(), data_type: DataType::Integer, nullable: false, primary_key: false },
            ],
            foreign_keys: vec![],
        };
        let row = Row::new(1, vec![Value::Integer(7), Value::Integer(100)]);
        match row.key(&schema) {
            RowKey::Primary(v) => assert_eq!(v.0, Value::Integer(7)),
            _ => panic!("expected primary key row identity"),
        }
    }
}
