//! Write-Ahead Log and crash/abort recovery.

mod log;
mod recovery;
mod wal;

pub use log::{LogOperation, LogRecord};
pub use recovery::{apply_undo, Recovery, UndoOp};
pub use wal::Wal;
