use async_trait::async_trait;
use datashare_common::error::StorageError;
use datashare_common::{BindingStream, RefCounter, Store};
use datashare_model::{Fact, TriplePattern};
use std::fmt::Debug;
use std::sync::Arc;

/// The contract of the local graph storage engine.
///
/// The engine answers conjunctive triple-pattern queries and accepts new facts. It is opened by
/// the [LocalStore] when the first reference is taken and closed when the last one is released.
#[async_trait]
pub trait GraphDatabase: Debug + Send + Sync {
    /// Opens (or creates) the database.
    fn open(&self) -> Result<(), StorageError>;

    /// Closes the database.
    fn close(&self);

    /// Returns the bindings that satisfy all `patterns`.
    fn query(&self, patterns: Vec<TriplePattern>) -> BindingStream;

    /// Inserts `facts`, returning the number of facts that were not yet present.
    async fn insert(&self, facts: Vec<Fact>) -> Result<usize, StorageError>;
}

/// The store backed by the local [GraphDatabase].
#[derive(Debug)]
pub struct LocalStore {
    uri: String,
    database: Arc<dyn GraphDatabase>,
    refs: RefCounter,
}

impl LocalStore {
    pub fn new(uri: impl Into<String>, database: Arc<dyn GraphDatabase>) -> Self {
        Self {
            uri: uri.into(),
            database,
            refs: RefCounter::new(),
        }
    }

    /// The number of outstanding references.
    pub fn ref_count(&self) -> usize {
        self.refs.count()
    }
}

#[async_trait]
impl Store for LocalStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn add_ref(&self) -> Result<(), StorageError> {
        self.refs.acquire(|| {
            tracing::debug!(uri = %self.uri, "Opening local database");
            self.database.open()
        })
    }

    fn unref(&self) {
        self.refs.release(|| {
            tracing::debug!(uri = %self.uri, "Closing local database");
            self.database.close();
        });
    }

    fn get(&self, patterns: &[TriplePattern]) -> BindingStream {
        self.database.query(patterns.to_vec())
    }

    async fn put(&self, facts: Vec<Fact>) -> Result<usize, StorageError> {
        self.database.insert(facts).await
    }
}
