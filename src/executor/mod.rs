//! Executor: turns a parsed statement into row streams or mutation counts
//! against the `Coordinator`, consulting the optimizer for SELECTs and
//! going straight to DDL/DML otherwise.

pub mod ddl;
pub mod dml;
pub mod evaluator;
pub mod query;

use crate::coordinator::{Coordinator, Session};
use crate::error::Result;
use crate::optimizer::{self, GeneticConfig, StatsProvider};
use crate::parser::{self, Statement};
use crate::planner;
use crate::tree::NodeKind;
use crate::types::{QueryResult, Statistic};

/// Adapts `StorageEngine::get_stats` to the optimizer's `StatsProvider`.
pub struct StorageStats<'a>(pub &'a crate::storage::StorageEngine);

impl<'a> StatsProvider for StorageStats<'a> {
    fn stats(&self, table: &str) -> Result<Statistic> {
        self.0.get_stats(table)
    }
}

/// Population/generation counts small enough to run inline on every query
/// without stalling an interactive session; still enough for the genetic
/// search to reliably beat a naive plan on the filter-ordering and join
/// cases the optimizer targets.
const INTERACTIVE_GENETIC_CONFIG: GeneticConfig =
    GeneticConfig { population: 24, generations: 30, mutation_rate: 0.15, crossover_rate: 0.8, elitism: 2 };

pub struct Executor<'a> {
    coordinator: &'a Coordinator,
}

impl<'a> Executor<'a> {
    pub fn new(coordinator: &'a Coordinator) -> Self {
        Self { coordinator }
    }

    pub fn execute(&self, sql: &str, session: &mut Session) -> Result<QueryResult> {
        let stmt = parser::Parser::parse(sql)?;
        match &stmt {
            Statement::Begin => {
                self.coordinator.begin_explicit(session)?;
                Ok(QueryResult::TransactionStarted)
            }
            Statement::Commit => {
                self.coordinator.commit(session)?;
                Ok(QueryResult::TransactionCommitted)
            }
            Statement::Rollback => {
                self.coordinator.abort(session)?;
                Ok(QueryResult::TransactionRolledBack)
            }
            Statement::Checkpoint => {
                self.coordinator.run_checkpoint()?;
                Ok(QueryResult::Ok)
            }
            Statement::CreateTable(ct) => {
                ddl::create_table(self.coordinator, session.client_id, ct)?;
                Ok(QueryResult::Ok)
            }
            Statement::DropTable(dt) => {
                ddl::drop_table(self.coordinator, session.client_id, dt)?;
                Ok(QueryResult::Ok)
            }
            Statement::Select(_) | Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                self.execute_transactional(&stmt, session)
            }
        }
    }

    fn execute_transactional(&self, stmt: &Statement, session: &mut Session) -> Result<QueryResult> {
        let tid = self.coordinator.ensure_txn(session)?;
        let result = self.run_statement(stmt, tid);
        match &result {
            Ok(_) => {
                if !session.explicit {
                    self.coordinator.commit(session)?;
                }
            }
            Err(e) => {
                if !session.explicit || e.aborts_transaction() {
                    let _ = self.coordinator.abort(session);
                }
            }
        }
        result
    }

    fn run_statement(&self, stmt: &Statement, tid: crate::concurrency::TxnId) -> Result<QueryResult> {
        let tree = planner::plan_from_statement(stmt)?;
        match tree.kind {
            NodeKind::InsertQuery => {
                let affected = dml::execute_insert(self.coordinator, tid, &tree)?;
                Ok(QueryResult::Modified { rows_affected: affected })
            }
            NodeKind::UpdateQuery => {
                let affected = dml::execute_update(self.coordinator, tid, &tree)?;
                Ok(QueryResult::Modified { rows_affected: affected })
            }
            NodeKind::DeleteQuery => {
                let affected = dml::execute_delete(self.coordinator, tid, &tree)?;
                Ok(QueryResult::Modified { rows_affected: affected })
            }
            _ => {
                let stats = StorageStats(&self.coordinator.storage);
                let optimized = optimizer::optimize(&tree, &stats, INTERACTIVE_GENETIC_CONFIG);
                let result_set = query::execute_select(self.coordinator, tid, &optimized)?;
                Ok(QueryResult::Select(result_set))
            }
        }
    }
}
