//! Cost model: `cost = io_cost + cpu_cost` per spec.md §4.5.b's operator
//! formulas and selectivity estimates, consulted by the genetic search's
//! fitness function.

use crate::error::Result;
use crate::types::Statistic;

pub const SEQUENTIAL_IO: f64 = 1.0;
pub const RANDOM_IO: f64 = 1.5;
pub const PER_TUPLE_CPU: f64 = 0.01;
pub const PER_COMPARISON_CPU: f64 = 0.001;
pub const PER_HASH_CPU: f64 = 0.005;
pub const PER_SORT_COMPARE_CPU: f64 = 0.002;

/// Source of per-table statistics the cost model reads from. Implemented by
/// `StorageEngine::get_stats` in the real system; a fixed-table map in tests.
pub trait StatsProvider {
    fn stats(&self, table: &str) -> Result<Statistic>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cost {
    pub io_cost: f64,
    pub cpu_cost: f64,
}

impl Cost {
    pub fn new(io_cost: f64, cpu_cost: f64) -> Self {
        Self { io_cost, cpu_cost }
    }

    pub fn total(&self) -> f64 {
        self.io_cost + self.cpu_cost
    }
}

impl std::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost { io_cost: self.io_cost + rhs.io_cost, cpu_cost: self.cpu_cost + rhs.cpu_cost }
    }
}

pub fn table_scan_cost(stats: &Statistic) -> Cost {
    Cost::new(stats.block_count as f64 * SEQUENTIAL_IO, stats.row_count as f64 * PER_TUPLE_CPU)
}

pub fn hash_index_lookup_cost(data_blocks: u64) -> Cost {
    Cost::new(RANDOM_IO + data_blocks as f64 * SEQUENTIAL_IO, 0.0)
}

pub fn btree_equality_cost(height: u64, data_blocks: u64) -> Cost {
    Cost::new((height as f64 + 1.0) * RANDOM_IO + data_blocks as f64 * SEQUENTIAL_IO, 0.0)
}

pub fn btree_range_cost(height: u64, leaf_scan: f64, data_blocks: u64) -> Cost {
    Cost::new((height as f64 + 1.0) * RANDOM_IO + leaf_scan + data_blocks as f64 * RANDOM_IO, 0.0)
}

/// Pipelined: I/O is a pass-through from the source, CPU scales with the
/// row count times the number of conjuncts evaluated per row.
pub fn filter_cost(rows: u64, conjuncts: u64) -> Cost {
    Cost::new(0.0, rows as f64 * conjuncts as f64 * PER_COMPARISON_CPU)
}

pub fn nested_loop_join_cost(b_outer: u64, b_inner: u64) -> Cost {
    Cost::new(b_outer as f64 + (b_outer * b_inner) as f64 * SEQUENTIAL_IO, 0.0)
}

pub fn hash_join_cost(build_io: Cost, probe_io: Cost, build_blocks: u64) -> Cost {
    build_io + probe_io + Cost::new(0.0, build_blocks as f64 * 2.0 * PER_HASH_CPU)
}

pub fn index_nested_loop_join_cost(outer_io: Cost, n_outer: u64, index_cost: Cost, data_blocks: u64) -> Cost {
    outer_io + Cost::new(n_outer as f64 * index_cost.io_cost, n_outer as f64 * index_cost.cpu_cost)
        + Cost::new(data_blocks as f64 * SEQUENTIAL_IO, 0.0)
}

pub fn sort_cost(n: u64, b: u64, passes: u64, source_io: Cost) -> Cost {
    let n_f = n as f64;
    let merge_io = 2.0 * b as f64 * (passes as f64 + 1.0);
    let compare_cpu = if n_f > 0.0 { n_f * n_f.log2() * PER_SORT_COMPARE_CPU } else { 0.0 };
    source_io + Cost::new(merge_io, compare_cpu)
}

pub mod selectivity {
    /// Equality predicate: `1 / V(a,r)`.
    pub fn equality(distinct_values: u64) -> f64 {
        if distinct_values == 0 {
            1.0
        } else {
            1.0 / distinct_values as f64
        }
    }

    pub fn range() -> f64 {
        0.33
    }

    pub fn between() -> f64 {
        0.25
    }

    pub fn like() -> f64 {
        0.05
    }

    pub fn in_list() -> f64 {
        0.3
    }

    pub fn exists() -> f64 {
        0.5
    }

    pub fn and(sels: &[f64]) -> f64 {
        sels.iter().product()
    }

    /// Inclusion-exclusion over two independent predicates: `a + b - a*b`.
    /// Folded pairwise for more than two terms.
    pub fn or(sels: &[f64]) -> f64 {
        sels.iter().fold(0.0, |acc, &s| acc + s - acc * s)
    }
}
