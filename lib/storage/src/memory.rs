//! An in-memory [GraphDatabase].

use crate::GraphDatabase;
use async_trait::async_trait;
use datashare_common::error::StorageError;
use datashare_common::BindingStream;
use datashare_model::{Binding, Fact, TriplePattern};
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A [GraphDatabase] that keeps its facts in memory.
///
/// Facts are kept in a sorted set, so queries return bindings in a stable order. The database
/// tracks whether it is open; querying or writing a closed database fails with
/// [StorageError::NotOpen].
#[derive(Debug)]
pub struct MemoryGraphDatabase {
    name: String,
    facts: Arc<RwLock<BTreeSet<Fact>>>,
    open: Arc<AtomicBool>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryGraphDatabase {
    /// Creates an empty, closed database.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_facts(name, Vec::new())
    }

    /// Creates a closed database that contains `facts`.
    pub fn with_facts(name: impl Into<String>, facts: impl IntoIterator<Item = Fact>) -> Self {
        Self {
            name: name.into(),
            facts: Arc::new(RwLock::new(facts.into_iter().collect())),
            open: Arc::new(AtomicBool::new(false)),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// How often the database has been opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    /// How often the database has been closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    /// The number of facts in the database.
    pub async fn len(&self) -> usize {
        self.facts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl GraphDatabase for MemoryGraphDatabase {
    fn open(&self) -> Result<(), StorageError> {
        self.open.store(true, Ordering::Release);
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    fn query(&self, patterns: Vec<TriplePattern>) -> BindingStream {
        let name = self.name.clone();
        let facts = Arc::clone(&self.facts);
        let open = Arc::clone(&self.open);
        let solutions = futures::stream::once(async move {
            if !open.load(Ordering::Acquire) {
                return Err(StorageError::NotOpen(name));
            }
            let facts = facts.read().await;
            let solutions = evaluate_basic_pattern(&facts, &patterns);
            Ok(futures::stream::iter(solutions.into_iter().map(Ok)))
        });
        solutions.try_flatten().boxed()
    }

    async fn insert(&self, facts: Vec<Fact>) -> Result<usize, StorageError> {
        if !self.is_open() {
            return Err(StorageError::NotOpen(self.name.clone()));
        }
        let mut content = self.facts.write().await;
        Ok(facts
            .into_iter()
            .filter(|fact| content.insert(fact.clone()))
            .count())
    }
}

/// Evaluates a conjunction of patterns by extending partial solutions one pattern at a time.
///
/// An empty conjunction has exactly one (empty) solution.
fn evaluate_basic_pattern(facts: &BTreeSet<Fact>, patterns: &[TriplePattern]) -> Vec<Binding> {
    let mut solutions = vec![Binding::new()];
    for pattern in patterns {
        solutions = solutions
            .iter()
            .flat_map(|solution| {
                facts
                    .iter()
                    .filter_map(move |fact| pattern.match_fact(fact, solution))
            })
            .collect();
        if solutions.is_empty() {
            break;
        }
    }
    solutions
}
