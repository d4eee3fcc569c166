use crate::error::StorageError;
use crate::BindingStream;
use async_trait::async_trait;
use datashare_model::{Fact, TriplePattern};
use std::fmt::Debug;
use std::sync::Arc;

/// A shared reference to a [Store].
pub type StoreRef = Arc<dyn Store>;

/// A named source (and optionally sink) of facts.
///
/// # Lifecycle
///
/// Consumers call [Store::add_ref] once per logical open and [Store::unref] once when they are
/// done. Implementations that hold an external resource (a database handle, a channel) acquire
/// it on the first reference and release it when the last reference is dropped. Calls to
/// [Store::get] are independent of the reference count and may run concurrently.
#[async_trait]
pub trait Store: Debug + Send + Sync {
    /// Returns the URI that identifies this store.
    fn uri(&self) -> &str;

    /// Takes a reference on the store, opening the underlying resource if this is the first one.
    fn add_ref(&self) -> Result<(), StorageError>;

    /// Releases a reference taken with [Store::add_ref].
    fn unref(&self);

    /// Returns a stream of the bindings that satisfy all `patterns` (a basic graph pattern).
    ///
    /// The stream is lazy: no work is done until it is polled.
    fn get(&self, patterns: &[TriplePattern]) -> BindingStream;

    /// Writes `facts` into the store, returning the number of new facts.
    ///
    /// Read-only stores keep the default implementation, which fails with
    /// [StorageError::NotPermitted].
    async fn put(&self, _facts: Vec<Fact>) -> Result<usize, StorageError> {
        Err(StorageError::not_permitted("put", self.uri()))
    }
}
