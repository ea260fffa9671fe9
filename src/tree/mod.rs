//! The algebraic tree: the typed node model shared by the planner, the
//! optimizer, and the executor.
//!
//! Every node carries a stable ID assigned at construction. The optimizer
//! keys its parameter maps by node ID (see `crate::optimizer::params`), so a
//! structural rewrite must either preserve the IDs of nodes it keeps or
//! rebuild the parameter map for the nodes it replaces.

mod node;
mod validate;

pub use node::{Node, NodeId, NodeKind, NodeValue};
pub use validate::validate;
