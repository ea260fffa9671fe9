//! Multi-version concurrency control: per-row version chains tagged by the
//! writer's timestamp. Readers see the latest version at or before their
//! start timestamp; only the write-validation rule differs across the
//! three sub-policies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{ConcurrencyControl, LockMode, Outcome, TxnId, Verdict};
use crate::types::RowKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvccPolicy {
    /// Timestamp-ordering write rule applied to the version chain.
    Tso,
    /// Two-phase locking on versions: a write takes an exclusive hold on
    /// the row until the writer ends.
    Mv2pl,
    /// Snapshot isolation, first-committer-wins.
    SnapshotFcw,
}

type ObjectKey = (String, Option<RowKey>);

struct VersionChain {
    /// `(writer_ts, committed)` pairs in writer-timestamp order. Only
    /// committed versions are visible to readers.
    versions: Vec<(u64, bool)>,
    /// `Mv2pl` only: the transaction currently holding the row exclusively.
    locked_by: Option<TxnId>,
}

impl Default for VersionChain {
    fn default() -> Self {
        Self { versions: Vec::new(), locked_by: None }
    }
}

pub struct Mvcc {
    policy: MvccPolicy,
    next_ts: AtomicU64,
    txn_start: Mutex<HashMap<TxnId, u64>>,
    chains: Mutex<HashMap<ObjectKey, VersionChain>>,
}

impl Mvcc {
    pub fn new(policy: MvccPolicy) -> Self {
        Self { policy, next_ts: AtomicU64::new(1), txn_start: Mutex::new(HashMap::new()), chains: Mutex::new(HashMap::new()) }
    }
}

impl ConcurrencyControl for Mvcc {
    fn name(&self) -> &'static str {
        "mvcc"
    }

    fn begin(&self, _client_id: u64) -> TxnId {
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
        self.txn_start.lock().unwrap().insert(ts, ts);
        ts
    }

    fn validate(&self, tid: TxnId, table: &str, row_key: Option<&RowKey>, mode: LockMode) -> Verdict {
        let start_ts = *self.txn_start.lock().unwrap().get(&tid).unwrap_or(&tid);
        let key = (table.to_string(), row_key.cloned());
        let mut chains = self.chains.lock().unwrap();
        let chain = chains.entry(key).or_default();

        match mode {
            // A reader always sees the latest committed version at or
            // before its own start timestamp (or none, if the row has no
            // history yet); reads never block or die under MVCC.
            LockMode::Read => Verdict::Grant,
            LockMode::Write => match self.policy {
                MvccPolicy::Tso => {
                    let conflict = chain.versions.iter().any(|(ts, committed)| *committed && *ts > start_ts);
                    if conflict {
                        Verdict::Die
                    } else {
                        chain.versions.push((tid, false));
                        Verdict::Grant
                    }
                }
                MvccPolicy::Mv2pl => match chain.locked_by {
                    Some(holder) if holder != tid => {
                        if tid < holder {
                            Verdict::Wait
                        } else {
                            Verdict::Die
                        }
                    }
                    _ => {
                        chain.locked_by = Some(tid);
                        Verdict::Grant
                    }
                },
                MvccPolicy::SnapshotFcw => {
                    chain.versions.push((tid, false));
                    Verdict::Grant
                }
            },
        }
    }

    fn end(&self, tid: TxnId, outcome: Outcome) -> Verdict {
        let start_ts = self.txn_start.lock().unwrap().remove(&tid).unwrap_or(tid);
        let mut chains = self.chains.lock().unwrap();

        if outcome == Outcome::Abort {
            for chain in chains.values_mut() {
                chain.versions.retain(|(ts, committed)| *ts != tid || *committed);
                if chain.locked_by == Some(tid) {
                    chain.locked_by = None;
                }
            }
            return Verdict::Grant;
        }

        if self.policy == MvccPolicy::SnapshotFcw {
            // First-committer-wins: abort if any other writer has already
            // committed a version for a row this transaction also wrote,
            // at a timestamp after this transaction's snapshot began.
            let conflict = chains.values().any(|chain| {
                chain.versions.iter().any(|(ts, _)| *ts == tid)
                    && chain.versions.iter().any(|(ts, committed)| *committed && *ts != tid && *ts > start_ts)
            });
            if conflict {
                for chain in chains.values_mut() {
                    chain.versions.retain(|(ts, _)| *ts != tid);
                }
                return Verdict::Die;
            }
        }

        for chain in chains.values_mut() {
            for v in chain.versions.iter_mut() {
                if v.0 == tid {
                    v.1 = true;
                }
            }
            if chain.locked_by == Some(tid) {
                chain.locked_by = None;
            }
        }
        Verdict::Grant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tso_policy_write_after_later_commit_dies() {
        let mvcc = Mvcc::new(MvccPolicy::Tso);
        let t1 = mvcc.begin(1);
        let t2 = mvcc.begin(1);
        assert_eq!(mvcc.validate(t2, "t", None, LockMode::Write), Verdict::Grant);
        assert_eq!(mvcc.end(t2, Outcome::Commit), Verdict::Grant);
        assert_eq!(mvcc.validate(t1, "t", None, LockMode::Write), Verdict::Die);
    }

    #[test]
    fn mv2pl_younger_writer_dies_older_waits() {
        let mvcc = Mvcc::new(MvccPolicy::Mv2pl);
        let old = mvcc.begin(1);
        let young = mvcc.begin(1);
        assert_eq!(mvcc.validate(young, "t", None, LockMode::Write), Verdict::Grant);
        assert_eq!(mvcc.validate(old, "t", None, LockMode::Write), Verdict::Wait);
    }

    #[test]
    fn snapshot_fcw_second_committer_loses() {
        let mvcc = Mvcc::new(MvccPolicy::SnapshotFcw);
        let t1 = mvcc.begin(1);
        let t2 = mvcc.begin(1);
        mvcc.validate(t1, "t", None, LockMode::Write);
        mvcc.validate(t2, "t", None, LockMode::Write);
        assert_eq!(mvcc.end(t1, Outcome::Commit), Verdict::Grant);
        assert_eq!(mvcc.end(t2, Outcome::Commit), Verdict::Die);
    }
}
