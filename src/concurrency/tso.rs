//! Timestamp-ordering variant: each transaction carries a monotonic start
//! timestamp; each object tracks `R-TS`/`W-TS`. Grants are immediate or a
//! `Die`; there is never a `Wait`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{ConcurrencyControl, LockMode, Outcome, TxnId, Verdict};
use crate::types::RowKey;

#[derive(Default, Clone, Copy)]
struct ObjectTimestamps {
    read_ts: u64,
    write_ts: u64,
}

fn object_key(table: &str, row_key: Option<&RowKey>) -> String {
    match row_key {
        Some(k) => format!("{}:{:?}", table, k),
        None => table.to_string(),
    }
}

pub struct Tso {
    next_ts: AtomicU64,
    objects: Mutex<HashMap<String, ObjectTimestamps>>,
    txn_ts: Mutex<HashMap<TxnId, u64>>,
}

impl Tso {
    pub fn new() -> Self {
        Self { next_ts: AtomicU64::new(1), objects: Mutex::new(HashMap::new()), txn_ts: Mutex::new(HashMap::new()) }
    }
}

impl ConcurrencyControl for Tso {
    fn name(&self) -> &'static str {
        "tso"
    }

    fn begin(&self, _client_id: u64) -> TxnId {
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
        self.txn_ts.lock().unwrap().insert(ts, ts);
        ts
    }

    fn validate(&self, tid: TxnId, table: &str, row_key: Option<&RowKey>, mode: LockMode) -> Verdict {
        let ts = *self.txn_ts.lock().unwrap().get(&tid).unwrap_or(&tid);
        let key = object_key(table, row_key);
        let mut objects = self.objects.lock().unwrap();
        let entry = objects.entry(key).or_insert_with(ObjectTimestamps::default);

        match mode {
            LockMode::Read => {
                if ts < entry.write_ts {
                    Verdict::Die
                } else {
                    entry.read_ts = entry.read_ts.max(ts);
                    Verdict::Grant
                }
            }
            LockMode::Write => {
                if ts < entry.read_ts || ts < entry.write_ts {
                    Verdict::Die
                } else {
                    entry.write_ts = ts;
                    Verdict::Grant
                }
            }
        }
    }

    fn end(&self, tid: TxnId, _outcome: Outcome) -> Verdict {
        self.txn_ts.lock().unwrap().remove(&tid);
        Verdict::Grant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RowKey, ValueKey};
    use crate::types::Value;

    fn key(i: i64) -> RowKey {
        RowKey::Primary(ValueKey::from(Value::Integer(i)))
    }

    #[test]
    fn write_older_than_an_existing_read_dies() {
        let tso = Tso::new();
        let reader = tso.begin(1);
        let writer = tso.begin(1);
        assert!(reader < writer);
        assert_eq!(tso.validate(writer, "t", Some(&key(1)), LockMode::Read), Verdict::Grant);
        assert_eq!(tso.validate(reader, "t", Some(&key(1)), LockMode::Write), Verdict::Die);
    }

    #[test]
    fn in_order_read_then_write_both_grant() {
        let tso = Tso::new();
        let t1 = tso.begin(1);
        let t2 = tso.begin(1);
        assert_eq!(tso.validate(t1, "t", Some(&key(1)), LockMode::Read), Verdict::Grant);
        assert_eq!(tso.validate(t2, "t", Some(&key(1)), LockMode::Write), Verdict::Grant);
    }
}
