//! The entry point of the crate, a [DataShare] node.
//!
//! Usage example:
//! ```
//! use datashare::engine::{Dataset, GraphPattern, SelectQuery};
//! use datashare::federation::memory::MemoryNetwork;
//! use datashare::model::{Fact, TriplePattern};
//! use datashare::storage::MemoryGraphDatabase;
//! use datashare::{DataShare, DataShareConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let network = MemoryNetwork::new();
//! let node = DataShare::new(
//!     DataShareConfig::default(),
//!     Arc::new(MemoryGraphDatabase::new("alice")),
//!     network.endpoint("alice"),
//! );
//! node.insert(vec![Fact::new("ex:alice", "foaf:knows", "ex:bob")]).await?;
//!
//! let pattern = GraphPattern::bgp([TriplePattern::parse("?x", "foaf:knows", "ex:bob")?]);
//! let query = SelectQuery::new(pattern, Dataset::new(node.namespaces().me()));
//! let solutions = node.query(&query)?.try_collect_to_vec().await?;
//! assert_eq!(solutions.len(), 1);
//! # Result::<_, Box<dyn std::error::Error>>::Ok(())
//! # }).unwrap();
//! ```

use crate::DataShareConfig;
use datashare_common::error::StorageError;
use datashare_common::{Store, StoreRef};
use datashare_engine::error::QueryEvaluationError;
use datashare_engine::{QuerySolutionStream, SelectQuery, SelectRunner, StoreResolver};
use datashare_federation::{Messaging, MetaStore, ResponderFeed};
use datashare_model::vocab::Namespaces;
use datashare_model::Fact;
use datashare_storage::{GraphDatabase, LocalStore};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A DataShare node.
///
/// A node owns the local store (backed by a [GraphDatabase]), the stores of its devices and the
/// remote stores of the accounts and feeds it talks to. Queries run against all of them; see
/// [MetaStore] for how store URIs are resolved.
///
/// Other accounts can only query the node once it has been [started](Self::start).
pub struct DataShare {
    config: DataShareConfig,
    namespaces: Namespaces,
    messaging: Arc<dyn Messaging>,
    local: Arc<LocalStore>,
    metastore: Arc<MetaStore>,
    runner: SelectRunner,
    responder: Arc<ResponderFeed>,
}

impl DataShare {
    /// Creates a node that stores its facts in `database` and talks to other accounts through
    /// `messaging`. The node acts as the account of `messaging`.
    pub fn new(
        config: DataShareConfig,
        database: Arc<dyn GraphDatabase>,
        messaging: Arc<dyn Messaging>,
    ) -> Self {
        let namespaces = config.namespaces();
        let protocol = config.protocol();
        let local = Arc::new(LocalStore::new(namespaces.me(), database));
        let metastore = Arc::new(MetaStore::new(
            namespaces.clone(),
            protocol.clone(),
            Arc::clone(&messaging),
            Arc::clone(&local) as StoreRef,
        ));
        let runner = SelectRunner::new(
            Arc::clone(&metastore) as Arc<dyn StoreResolver>,
            config.evaluation_config(),
        );
        let responder = Arc::new(
            ResponderFeed::new(
                Arc::clone(&messaging),
                runner.clone(),
                protocol,
                namespaces.clone(),
            )
            .with_batch_size(config.reply_batch_size),
        );
        tracing::debug!(account = messaging.identity(), "Created DataShare node");

        Self {
            config,
            namespaces,
            messaging,
            local,
            metastore,
            runner,
            responder,
        }
    }

    pub fn config(&self) -> &DataShareConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// The account this node acts as.
    pub fn account(&self) -> &str {
        self.messaging.identity()
    }

    /// The URI other accounts use to query this node.
    pub fn uri(&self) -> String {
        self.namespaces.user(self.account())
    }

    /// Returns the resolver that maps URIs to the stores of this node.
    pub fn metastore(&self) -> &Arc<MetaStore> {
        &self.metastore
    }

    /// Starts evaluating `query`.
    ///
    /// The stores the query names are referenced until the returned stream ends, fails or is
    /// dropped.
    pub fn query(&self, query: &SelectQuery) -> Result<QuerySolutionStream, QueryEvaluationError> {
        self.runner.execute(query)
    }

    /// Inserts `facts` into the local store, returning the number of facts that were new.
    pub async fn insert(&self, facts: Vec<Fact>) -> Result<usize, StorageError> {
        self.local.add_ref()?;
        let result = self.local.put(facts).await;
        self.local.unref();
        result
    }

    /// Starts answering the requests of other accounts.
    pub fn start(&self) {
        self.responder.start();
    }

    /// Stops answering requests and aborts those in flight.
    pub fn stop(&self) {
        self.responder.stop();
    }

    pub fn is_started(&self) -> bool {
        self.responder.is_started()
    }

    /// Makes the store of a local device available under `me/<device>` and as part of `me`.
    pub fn add_device(&self, device: impl Into<String>, store: StoreRef) {
        self.metastore.add_device(device, store);
    }

    /// Removes the store of a local device.
    pub fn remove_device(&self, device: &str) -> Option<StoreRef> {
        self.metastore.remove_device(device)
    }
}

impl Drop for DataShare {
    fn drop(&mut self) {
        self.responder.stop();
    }
}

impl Debug for DataShare {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataShare")
            .field("account", &self.account())
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
