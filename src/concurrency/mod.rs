//! Concurrency Control Manager: one capability-set trait, four pluggable
//! algorithms, swappable at runtime while no transaction is active.

mod mvcc;
mod occ;
mod tso;
mod wait_die;

pub use mvcc::{Mvcc, MvccPolicy};
pub use occ::Occ;
pub use tso::Tso;
pub use wait_die::WaitDie;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::RowKey;

pub type TxnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Grant,
    Wait,
    Die,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Abort,
}

/// Returned by `Manager::change_algorithm` when a swap is refused because a
/// transaction is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy {
    pub active_count: u64,
}

/// Capability set every concurrency algorithm implements.
pub trait ConcurrencyControl: Send + Sync {
    fn name(&self) -> &'static str;
    fn begin(&self, client_id: u64) -> TxnId;
    /// Checks (and, for the Wait-Die variant, blocks to acquire) access to
    /// `row_key` in `table` under `mode`. `row_key` is `None` for
    /// table-level requests (e.g. `CREATE TABLE`, a full scan with no
    /// predicate narrowing).
    fn validate(&self, tid: TxnId, table: &str, row_key: Option<&RowKey>, mode: LockMode) -> Verdict;
    /// Ends a transaction. Returns `Die` if committing would violate the
    /// algorithm's isolation guarantee (only reachable for `Occ`/`Mvcc`'s
    /// commit-time validation). The caller must then run the abort path
    /// instead of the commit path it asked for.
    fn end(&self, tid: TxnId, outcome: Outcome) -> Verdict;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    WaitDie,
    Tso,
    Occ,
    Mvcc(MvccPolicy),
}

/// Owns the active algorithm behind a swappable pointer, and the
/// active-transaction counter `change_algorithm` consults. Each `begin`
/// increments the counter; each `end` decrements it, so the counter always
/// reflects transactions that have begun but not yet ended under whichever
/// algorithm was active at the time. Swapping mid-flight is refused
/// precisely to avoid stranding such a transaction.
pub struct Manager {
    current: RwLock<Arc<dyn ConcurrencyControl>>,
    active_count: AtomicU64,
    swap_lock: std::sync::Mutex<()>,
}

impl Manager {
    pub fn new(variant: Variant) -> Self {
        Self {
            current: RwLock::new(make(variant)),
            active_count: AtomicU64::new(0),
            swap_lock: std::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<dyn ConcurrencyControl> {
        Arc::clone(&self.current.read().unwrap())
    }

    pub fn begin(&self, client_id: u64) -> TxnId {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        self.current().begin(client_id)
    }

    pub fn validate(&self, tid: TxnId, table: &str, row_key: Option<&RowKey>, mode: LockMode) -> Verdict {
        self.current().validate(tid, table, row_key, mode)
    }

    pub fn end(&self, tid: TxnId, outcome: Outcome) -> Verdict {
        let verdict = self.current().end(tid, outcome);
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        verdict
    }

    /// Swaps the active algorithm, refusing with `Busy` while any
    /// transaction begun under the old algorithm hasn't ended. Serialized by
    /// a dedicated lock so two concurrent callers can't both pass the
    /// active-count check and race each other's swap.
    pub fn change_algorithm(&self, variant: Variant) -> Result<(), Busy> {
        let _guard = self.swap_lock.lock().unwrap();
        let active = self.active_count.load(Ordering::SeqCst);
        if active > 0 {
            return Err(Busy { active_count: active });
        }
        *self.current.write().unwrap() = make(variant);
        Ok(())
    }

    pub fn active_variant_name(&self) -> &'static str {
        // Leaks nothing: `name()` returns a `'static str` literal owned by
        // the algorithm implementation itself.
        let cc = self.current();
        let name = cc.name();
        name
    }
}

fn make(variant: Variant) -> Arc<dyn ConcurrencyControl> {
    match variant {
        Variant::WaitDie => Arc::new(WaitDie::new()),
        Variant::Tso => Arc::new(Tso::new()),
        Variant::Occ => Arc::new(Occ::new()),
        Variant::Mvcc(policy) => Arc::new(Mvcc::new(policy)),
    }
}
