//! Cost-based query optimizer: deterministic rewrite rules followed by a
//! genetic search over the non-deterministic rewrite-parameter space.

pub mod cost;
pub mod genetic;
pub mod params;
mod rules;

pub use cost::{Cost, StatsProvider};
pub use genetic::{optimize, optimize_with_fitness, GeneticConfig};
pub use params::PlanParams;

use crate::tree::Node;

/// Applies the deterministic rewrite rules once, in order: projection
/// elimination, filter pushdown over join, projection pushdown over join.
pub fn apply_deterministic_rules(tree: &Node) -> Node {
    let tree = rules::eliminate_redundant_projection(tree);
    let tree = rules::pushdown_filter_over_join(&tree);
    rules::pushdown_projection_over_join(&tree)
}
