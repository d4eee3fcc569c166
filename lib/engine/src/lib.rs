//! The DataShare query engine.
//!
//! A [SelectQuery] is turned into a tree of [QueryNode]s, whose variable scope is computed once
//! bottom-up. The tree is then evaluated against the stores resolved by a [StoreResolver] into a
//! single lazy stream of bindings, the [QuerySolutionStream].

pub mod algebra;
mod config;
mod context;
pub mod error;
pub mod expression;
mod join;
mod modifiers;
mod node;
mod optimizer;
mod runner;
mod stores;

pub use algebra::{Dataset, GraphPattern, SelectQuery};
pub use config::{EvaluationConfig, DEFAULT_JOIN_BUFFER_CAPACITY};
pub use context::EvaluationContext;
pub use join::{JoinKind, NestedLoopJoin, StreamFactory};
pub use node::{NodeKind, QueryNode};
pub use optimizer::push_down_projections;
pub use runner::{QuerySolutionStream, SelectRunner};
pub use stores::{OpenedStores, StoreResolver};
