//! S1: repeated updates to the same row within one transaction collapse to
//! a single storage write on commit, and the write-ahead log still carries
//! every individual WRITE record leading up to the COMMIT.

use tempfile::tempdir;

use bedrockdb::coordinator::{Coordinator, Session};
use bedrockdb::concurrency::Variant;
use bedrockdb::executor::Executor;
use bedrockdb::recovery::LogOperation;
use bedrockdb::storage::{ReadRequest, WriteMode};
use bedrockdb::types::{QueryResult, Value};

fn setup() -> (Coordinator, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let coordinator = Coordinator::open(dir.path().to_path_buf(), Variant::WaitDie, 200).unwrap();
    (coordinator, dir)
}

fn execute_ok(executor: &Executor, session: &mut Session, sql: &str) -> QueryResult {
    executor.execute(sql, session).unwrap_or_else(|e| panic!("SQL '{}' failed: {:?}", sql, e))
}

#[test]
fn repeated_updates_collapse_to_one_write_and_keep_every_wal_record() {
    let (coordinator, _dir) = setup();
    coordinator
        .storage
        .create_table(bedrockdb::types::TableSchema {
            name: "users".into(),
            columns: vec![
                bedrockdb::types::ColumnDef { name: "id".into(), data_type: bedrockdb::types::DataType::Integer, nullable: false, primary_key: true },
                bedrockdb::types::ColumnDef { name: "score".into(), data_type: bedrockdb::types::DataType::Integer, nullable: false, primary_key: false },
                bedrockdb::types::ColumnDef { name: "status".into(), data_type: bedrockdb::types::DataType::Varchar(None), nullable: false, primary_key: false },
            ],
            foreign_keys: vec![],
        })
        .unwrap();
    coordinator
        .storage
        .write_block("users", vec![vec![Value::Integer(1), Value::Integer(100), Value::String("active".into())]], WriteMode::Append)
        .unwrap();

    let executor = Executor::new(&coordinator);
    let mut session = Session::new(1);

    execute_ok(&executor, &mut session, "BEGIN TRANSACTION;");
    execute_ok(&executor, &mut session, "UPDATE users SET score = score + 50 WHERE id = 1;");
    execute_ok(&executor, &mut session, "UPDATE users SET score = score + 50 WHERE id = 1;");
    execute_ok(&executor, &mut session, "UPDATE users SET status = 'premium' WHERE id = 1;");
    execute_ok(&executor, &mut session, "COMMIT;");

    let rows = coordinator
        .storage
        .read_block(&ReadRequest { table: "users".into(), columns: vec!["*".into()], conditions: vec![] })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[1], Value::Integer(200));
    assert_eq!(rows[0].values[2], Value::String("premium".into()));

    let records = coordinator.recovery_records().unwrap();
    let write_count = records.iter().filter(|r| matches!(r.op, LogOperation::Write { .. })).count();
    let commit_count = records.iter().filter(|r| matches!(r.op, LogOperation::Commit)).count();
    assert_eq!(write_count, 3, "every buffered UPDATE should still leave its own WRITE record");
    assert_eq!(commit_count, 1);

    let res = execute_ok(&executor, &mut session, "SELECT id, score, status FROM users;");
    match res {
        QueryResult::Select(rs) => {
            assert_eq!(rs.rows.len(), 1);
            assert_eq!(rs.rows[0], vec![Value::Integer(1), Value::Integer(200), Value::String("premium".into())]);
        }
        other => panic!("expected a SELECT result, got {:?}", other),
    }
}
