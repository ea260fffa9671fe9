//! Wait-Die lock manager: the primary concurrency-control variant.
//!
//! Locks are table-granular (`row_key` is accepted for trait-signature
//! uniformity but ignored; row-level locking is a documented future
//! refinement). An older transaction (lower `tid`) blocks and waits for a
//! younger holder to release; a younger transaction requesting a table held
//! by an older one dies immediately. One-way waits (old waits for young,
//! never the reverse) make deadlock structurally impossible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use super::{ConcurrencyControl, LockMode, Outcome, TxnId, Verdict};
use crate::types::RowKey;

struct TableLock {
    holders: HashMap<TxnId, LockMode>,
}

pub struct WaitDie {
    next_tid: AtomicU64,
    state: Mutex<HashMap<String, TableLock>>,
    released: Condvar,
}

impl WaitDie {
    pub fn new() -> Self {
        Self { next_tid: AtomicU64::new(1), state: Mutex::new(HashMap::new()), released: Condvar::new() }
    }
}

fn compatible(lock: &TableLock, mode: LockMode) -> bool {
    if lock.holders.is_empty() {
        return true;
    }
    match mode {
        LockMode::Read => lock.holders.values().all(|m| *m == LockMode::Read),
        LockMode::Write => false,
    }
}

impl ConcurrencyControl for WaitDie {
    fn name(&self) -> &'static str {
        "wait_die"
    }

    fn begin(&self, _client_id: u64) -> TxnId {
        self.next_tid.fetch_add(1, Ordering::SeqCst)
    }

    fn validate(&self, tid: TxnId, table: &str, _row_key: Option<&RowKey>, mode: LockMode) -> Verdict {
        let mut state = self.state.lock().unwrap();
        loop {
            state.entry(table.to_string()).or_insert_with(|| TableLock { holders: HashMap::new() });
            let lock = state.get(table).unwrap();

            // Sole holder (or no holder) besides the requester: grant
            // outright, covering both the first acquisition and a
            // shared->exclusive upgrade by the table's only holder.
            let others: Vec<TxnId> = lock.holders.keys().copied().filter(|&h| h != tid).collect();
            if others.is_empty() || compatible(lock, mode) {
                let lock = state.get_mut(table).unwrap();
                lock.holders.insert(tid, mode);
                return Verdict::Grant;
            }

            let oldest = *others.iter().min().unwrap();
            if tid < oldest {
                log::debug!("wait-die: tid {} older than holder {}, waiting on '{}'", tid, oldest, table);
                state = self.released.wait(state).unwrap();
                continue;
            }
            log::debug!("wait-die: tid {} younger than holder {}, dying on '{}'", tid, oldest, table);
            return Verdict::Die;
        }
    }

    fn end(&self, tid: TxnId, _outcome: Outcome) -> Verdict {
        let mut state = self.state.lock().unwrap();
        for lock in state.values_mut() {
            lock.holders.remove(&tid);
        }
        drop(state);
        self.released.notify_all();
        Verdict::Grant
    }
}
