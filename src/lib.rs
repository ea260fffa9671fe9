//! bedrockdb: a teaching-grade relational database engine built around a
//! pluggable concurrency-control manager, a write-ahead recovery log, and a
//! genetic-search cost-based optimizer sitting in front of a hand-written
//! SQL parser and row-oriented block storage layer.

pub mod concurrency;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod planner;
pub mod recovery;
pub mod server;
pub mod storage;
pub mod tree;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use crate::concurrency::Variant;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::server::Shell;

/// Server configuration: where the data lives, which concurrency-control
/// variant is active, how often writes get checkpointed, and what address
/// the shell listens on.
#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub checkpoint_threshold: u64,
    pub cc_variant: Variant,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", server::DEFAULT_PORT),
            data_dir: PathBuf::from("./data"),
            checkpoint_threshold: 200,
            cc_variant: Variant::WaitDie,
        }
    }
}

/// Opens the coordinator (replaying the recovery log over whatever is on
/// disk already) and hands back a `Shell` ready to `run()`.
pub fn build(config: Config) -> Result<Shell> {
    std::fs::create_dir_all(&config.data_dir)?;
    let coordinator = Coordinator::open(config.data_dir, config.cc_variant, config.checkpoint_threshold)?;
    Ok(Shell::new(Arc::new(coordinator), config.bind_addr))
}
