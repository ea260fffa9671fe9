//! The write-ahead log file: one dedicated writer thread owns the file
//! handle, serializing every append (group-commit style) and fsyncing
//! before replying, so a caller that has received an LSN back knows the
//! record is durable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::error::{DbError, Result};

use super::log::LogRecord;

enum WalMessage {
    Append(LogRecord, mpsc::SyncSender<Result<u64>>),
    ReadAll(mpsc::SyncSender<Result<Vec<LogRecord>>>),
}

pub struct Wal {
    sender: mpsc::SyncSender<WalMessage>,
    next_lsn: AtomicU64,
    _worker: thread::JoinHandle<()>,
}

impl Wal {
    pub fn open(path: PathBuf) -> Result<Self> {
        let existing = read_all_records(&path)?;
        let next_lsn = existing.last().map(|r| r.lsn + 1).unwrap_or(1);

        let (tx, rx) = mpsc::sync_channel::<WalMessage>(1024);
        let worker = thread::spawn(move || wal_worker(path, rx));

        Ok(Self { sender: tx, next_lsn: AtomicU64::new(next_lsn), _worker: worker })
    }

    fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    pub fn append(&self, txn_id: crate::concurrency::TxnId, op: super::log::LogOperation) -> Result<u64> {
        let record = LogRecord { lsn: self.next_lsn(), txn_id, op };
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(WalMessage::Append(record, tx))
            .map_err(|_| DbError::resource("WAL writer thread is gone"))?;
        rx.recv().map_err(|_| DbError::resource("WAL writer thread dropped the response channel"))?
    }

    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(WalMessage::ReadAll(tx))
            .map_err(|_| DbError::resource("WAL writer thread is gone"))?;
        rx.recv().map_err(|_| DbError::resource("WAL writer thread dropped the response channel"))?
    }
}

fn wal_worker(path: PathBuf, rx: mpsc::Receiver<WalMessage>) {
    let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            log::error!("WAL writer could not open {:?}: {}", path, e);
            return;
        }
    };

    while let Ok(msg) = rx.recv() {
        match msg {
            WalMessage::Append(record, responder) => {
                let result = append_record(&mut file, &record);
                let _ = responder.send(result.map(|_| record.lsn));
            }
            WalMessage::ReadAll(responder) => {
                let _ = responder.send(read_all_records(&path));
            }
        }
    }
}

fn append_record(file: &mut File, record: &LogRecord) -> Result<()> {
    let payload = bincode::serialize(record)?;
    let len = payload.len() as u32;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(&payload)?;
    file.sync_data()?;
    Ok(())
}

fn read_all_records(path: &Path) -> Result<Vec<LogRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            // Truncated trailing record from a crash mid-write; stop here.
            break;
        }
        let record: LogRecord = bincode::deserialize(&bytes[pos..pos + len])?;
        pos += len;
        records.push(record);
    }
    Ok(records)
}
