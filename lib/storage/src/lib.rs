//! Store implementations for DataShare.
//!
//! - [EmptyStore] never produces anything and stands in for unknown URIs.
//! - [UnionStore] fans queries out to several stores.
//! - [LocalStore] wraps a [GraphDatabase], the local storage engine.

mod empty;
mod local;
pub mod memory;
mod union;

pub use empty::EmptyStore;
pub use local::{GraphDatabase, LocalStore};
pub use memory::MemoryGraphDatabase;
pub use union::UnionStore;
