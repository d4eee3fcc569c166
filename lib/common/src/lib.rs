//! Contracts shared between the storage, engine and federation layers of DataShare.

pub mod error;
mod refcount;
mod store;
mod stream;

pub use refcount::RefCounter;
pub use store::{Store, StoreRef};
pub use stream::{empty_stream, union_streams, BindingStream, BindingTransform, UnionStream};
