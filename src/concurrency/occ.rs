//! Optimistic concurrency control: accumulate read/write sets during
//! execution, validate against concurrently committed transactions at
//! commit time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{ConcurrencyControl, LockMode, Outcome, TxnId, Verdict};
use crate::types::RowKey;

type ObjectKey = (String, Option<RowKey>);

struct TxnState {
    start_seq: u64,
    read_set: HashSet<ObjectKey>,
    write_set: HashSet<ObjectKey>,
}

pub struct Occ {
    next_tid: AtomicU64,
    commit_seq: AtomicU64,
    active: Mutex<HashMap<TxnId, TxnState>>,
    /// Write-sets of transactions that have already committed, tagged by
    /// the commit sequence number at which they became visible.
    committed: Mutex<Vec<(u64, HashSet<ObjectKey>)>>,
}

impl Occ {
    pub fn new() -> Self {
        Self {
            next_tid: AtomicU64::new(1),
            commit_seq: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            committed: Mutex::new(Vec::new()),
        }
    }
}

impl ConcurrencyControl for Occ {
    fn name(&self) -> &'static str {
        "occ"
    }

    fn begin(&self, _client_id: u64) -> TxnId {
        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        let start_seq = self.commit_seq.load(Ordering::SeqCst);
        self.active.lock().unwrap().insert(
            tid,
            TxnState { start_seq, read_set: HashSet::new(), write_set: HashSet::new() },
        );
        tid
    }

    fn validate(&self, tid: TxnId, table: &str, row_key: Option<&RowKey>, mode: LockMode) -> Verdict {
        let mut active = self.active.lock().unwrap();
        if let Some(state) = active.get_mut(&tid) {
            let key = (table.to_string(), row_key.cloned());
            match mode {
                LockMode::Read => {
                    state.read_set.insert(key);
                }
                LockMode::Write => {
                    state.write_set.insert(key);
                }
            }
        }
        Verdict::Grant
    }

    fn end(&self, tid: TxnId, outcome: Outcome) -> Verdict {
        let state = self.active.lock().unwrap().remove(&tid);
        let Some(state) = state else { return Verdict::Grant };

        if outcome == Outcome::Abort {
            return Verdict::Grant;
        }

        let committed = self.committed.lock().unwrap();
        let conflict = committed
            .iter()
            .filter(|(seq, _)| *seq > state.start_seq)
            .any(|(_, write_set)| write_set.intersection(&state.read_set).next().is_some());
        drop(committed);

        if conflict {
            log::debug!("occ: tid {} fails validation, read-set overlaps a concurrent commit", tid);
            return Verdict::Die;
        }

        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.committed.lock().unwrap().push((seq, state.write_set));
        Verdict::Grant
    }
}
