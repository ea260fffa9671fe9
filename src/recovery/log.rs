//! WAL record shapes: `BEGIN`, `WRITE(old, new)`, `COMMIT`, `ABORT`,
//! `CHECKPOINT`. Insert/update/delete all reduce to the single `Write`
//! shape: insert has `old = None`, delete has `new = None`.

use serde::{Deserialize, Serialize};

use crate::concurrency::TxnId;
use crate::types::Row;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogOperation {
    Begin,
    Write { table: String, old: Option<Row>, new: Option<Row> },
    Commit,
    Abort,
    Checkpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: u64,
    pub txn_id: TxnId,
    pub op: LogOperation,
}
