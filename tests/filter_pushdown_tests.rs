//! S5: a filter above a join gets pushed down to the side whose table it
//! references, the rewrite lowers the optimizer's estimated cost, and the
//! rewritten plan still produces the same result set end to end.

use std::collections::HashMap;

use tempfile::tempdir;

use bedrockdb::concurrency::Variant;
use bedrockdb::coordinator::{Coordinator, Session};
use bedrockdb::error::{DbError, Result};
use bedrockdb::executor::Executor;
use bedrockdb::optimizer::{self, cost, Cost, StatsProvider};
use bedrockdb::planner;
use bedrockdb::tree::NodeKind;
use bedrockdb::types::{ColumnDef, DataType, QueryResult, Statistic, TableSchema, Value};

struct FixedStats(HashMap<String, Statistic>);

impl StatsProvider for FixedStats {
    fn stats(&self, table: &str) -> Result<Statistic> {
        self.0.get(table).cloned().ok_or_else(|| DbError::table_not_found(table))
    }
}

fn stat(row_count: u64, block_count: u64) -> Statistic {
    Statistic { row_count, block_count, distinct_values: HashMap::new(), indexes: vec![] }
}

fn setup() -> (Coordinator, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let coordinator = Coordinator::open(dir.path().to_path_buf(), Variant::WaitDie, 200).unwrap();
    coordinator
        .storage
        .create_table(TableSchema {
            name: "users".into(),
            columns: vec![
                ColumnDef { name: "id".into(), data_type: DataType::Integer, nullable: false, primary_key: true },
                ColumnDef { name: "age".into(), data_type: DataType::Integer, nullable: false, primary_key: false },
            ],
            foreign_keys: vec![],
        })
        .unwrap();
    coordinator
        .storage
        .create_table(TableSchema {
            name: "profiles".into(),
            columns: vec![
                ColumnDef { name: "user_id".into(), data_type: DataType::Integer, nullable: false, primary_key: false },
                ColumnDef { name: "bio".into(), data_type: DataType::Varchar(None), nullable: false, primary_key: false },
            ],
            foreign_keys: vec![],
        })
        .unwrap();

    for id in 1..=100i64 {
        coordinator
            .storage
            .write_block("users", vec![vec![Value::Integer(id), Value::Integer(if id == 42 { 100 } else { 20 })]], bedrockdb::storage::WriteMode::Append)
            .unwrap();
        coordinator
            .storage
            .write_block("profiles", vec![vec![Value::Integer(id), Value::String(format!("bio {}", id))]], bedrockdb::storage::WriteMode::Append)
            .unwrap();
    }
    (coordinator, dir)
}

/// The deterministic rewrite puts a `FILTER` on `users.age` directly above
/// the `users` relation, on the join's left side, instead of above the join.
#[test]
fn pushdown_moves_the_filter_below_the_join() {
    let tree = planner::plan("SELECT * FROM users JOIN profiles ON users.id = profiles.user_id WHERE users.age > 99;").unwrap();
    let rewritten = optimizer::apply_deterministic_rules(&tree);

    let project = &rewritten;
    assert_eq!(project.kind, NodeKind::Project);
    let join = &project.children[0];
    assert_eq!(join.kind, NodeKind::Join);
    assert_eq!(join.children[0].kind, NodeKind::Filter, "the age filter should sit below the join on its left side");
    assert_eq!(join.children[1].kind, NodeKind::Relation, "profiles carries no filter of its own, so it stays a bare relation");
}

#[test]
fn pushdown_lowers_the_estimated_cost_against_the_same_statistics() {
    let mut stats_map = HashMap::new();
    stats_map.insert("users".to_string(), stat(100, 10));
    stats_map.insert("profiles".to_string(), stat(100, 10));
    let stats = FixedStats(stats_map);

    let tree = planner::plan("SELECT * FROM users JOIN profiles ON users.id = profiles.user_id WHERE users.age > 99;").unwrap();
    let pushed_down = optimizer::apply_deterministic_rules(&tree);

    let pre_pushdown_cost = cost_of(&tree, &stats);
    let pushed_down_cost = cost_of(&pushed_down, &stats);
    assert!(
        pushed_down_cost.total() < pre_pushdown_cost.total(),
        "pushed-down plan ({}) should cost less than the original ({})",
        pushed_down_cost.total(),
        pre_pushdown_cost.total()
    );
}

fn cost_of(node: &bedrockdb::tree::Node, stats: &dyn StatsProvider) -> Cost {
    match node.kind {
        NodeKind::Relation => {
            let table = node.value.as_ident().unwrap_or("");
            stats.stats(table).map(|s| cost::table_scan_cost(&s)).unwrap_or_default()
        }
        NodeKind::Filter => {
            let source = cost_of(&node.children[0], stats);
            source + cost::filter_cost(rows_of(&node.children[0], stats), 1)
        }
        NodeKind::Join => {
            let left = cost_of(&node.children[0], stats);
            let right = cost_of(&node.children[1], stats);
            let b_outer = rows_of(&node.children[0], stats).max(1);
            let b_inner = rows_of(&node.children[1], stats).max(1);
            left + right + cost::nested_loop_join_cost(b_outer, b_inner)
        }
        _ => node.children.iter().map(|c| cost_of(c, stats)).fold(Cost::default(), |a, b| a + b),
    }
}

fn rows_of(node: &bedrockdb::tree::Node, stats: &dyn StatsProvider) -> u64 {
    match node.kind {
        NodeKind::Relation => {
            let table = node.value.as_ident().unwrap_or("");
            stats.stats(table).map(|s| s.row_count).unwrap_or(1)
        }
        NodeKind::Filter => (rows_of(&node.children[0], stats) as f64 * 0.33).ceil().max(1.0) as u64,
        NodeKind::Join => rows_of(&node.children[0], stats).saturating_mul(rows_of(&node.children[1], stats)).max(1),
        _ => node.children.first().map(|c| rows_of(c, stats)).unwrap_or(1),
    }
}

#[test]
fn end_to_end_query_returns_the_single_matching_row() {
    let (coordinator, _dir) = setup();
    let executor = Executor::new(&coordinator);
    let mut session = Session::new(1);

    let res = executor
        .execute("SELECT users.id FROM users JOIN profiles ON users.id = profiles.user_id WHERE users.age > 99;", &mut session)
        .unwrap();
    match res {
        QueryResult::Select(rs) => {
            assert_eq!(rs.rows.len(), 1);
            assert_eq!(rs.rows[0][0], Value::Integer(42));
        }
        other => panic!("expected a SELECT result, got {:?}", other),
    }
}
