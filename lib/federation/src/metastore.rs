use crate::messaging::{Messaging, PeerAddress};
use crate::protocol::Protocol;
use crate::remote::{RemotePeer, RemoteStore};
use dashmap::DashMap;
use datashare_common::StoreRef;
use datashare_engine::StoreResolver;
use datashare_model::vocab::{NamespaceRef, Namespaces};
use datashare_storage::{EmptyStore, UnionStore};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::fmt::{Debug, Formatter};
use std::hash::BuildHasherDefault;
use std::sync::Arc;

type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Resolves the URIs of the DataShare namespaces to stores.
///
/// - `me` resolves to the union of the local store and every device store.
/// - `me/<device>` resolves to the store of that device.
/// - `user/<own account>[/<path>]` resolves like `me[/<path>]`.
/// - `user/<account>[/<path>]` and `feed/<id>[/<path>]` resolve to a remote store that forwards
///   queries to the peer. Remote stores are cached per URI and never evicted, so every lookup of
///   the same URI returns the same instance.
/// - Everything else resolves to an empty store.
pub struct MetaStore {
    namespaces: Namespaces,
    protocol: Protocol,
    messaging: Arc<dyn Messaging>,
    local: StoreRef,
    devices: RwLock<FxHashMap<String, StoreRef>>,
    peers: FxDashMap<PeerAddress, Arc<RemotePeer>>,
    proxies: FxDashMap<String, StoreRef>,
}

impl MetaStore {
    pub fn new(
        namespaces: Namespaces,
        protocol: Protocol,
        messaging: Arc<dyn Messaging>,
        local: StoreRef,
    ) -> Self {
        Self {
            namespaces,
            protocol,
            messaging,
            local,
            devices: RwLock::new(FxHashMap::default()),
            peers: FxDashMap::default(),
            proxies: FxDashMap::default(),
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Registers the store of a local device, replacing a previous one.
    pub fn add_device(&self, device: impl Into<String>, store: StoreRef) {
        let device = device.into();
        tracing::debug!(device, "Adding device store");
        self.devices.write().insert(device, store);
    }

    /// Removes the store of a local device. Returns the removed store.
    pub fn remove_device(&self, device: &str) -> Option<StoreRef> {
        self.devices.write().remove(device)
    }

    /// The number of cached remote stores.
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Returns the cached peer for `address`, if a remote store of it was resolved.
    pub fn peer(&self, address: &PeerAddress) -> Option<Arc<RemotePeer>> {
        self.peers.get(address).map(|peer| Arc::clone(peer.value()))
    }

    fn resolve_self(&self, uri: &str, device: Option<&str>) -> StoreRef {
        let devices = self.devices.read();
        match device {
            None => {
                let mut children = Vec::with_capacity(devices.len() + 1);
                children.push(Arc::clone(&self.local));
                let mut entries = devices.iter().collect::<Vec<_>>();
                entries.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
                children.extend(entries.into_iter().map(|(_, store)| Arc::clone(store)));
                Arc::new(UnionStore::new(uri, children))
            }
            Some(device) => devices
                .get(device)
                .map_or_else(|| empty(uri), Arc::clone),
        }
    }

    fn resolve_remote(&self, uri: &str, address: PeerAddress, owner_uri: String) -> StoreRef {
        let entry = self.proxies.entry(uri.to_owned()).or_insert_with(|| {
            let peer = self.peers.entry(address.clone()).or_insert_with(|| {
                tracing::debug!(peer = %address, "Creating remote peer");
                RemotePeer::new(
                    address.clone(),
                    Arc::clone(&self.messaging),
                    self.protocol.clone(),
                    self.namespaces.user(self.messaging.identity()),
                    owner_uri,
                )
            });
            Arc::new(RemoteStore::new(uri, Arc::clone(peer.value())))
        });
        Arc::clone(entry.value())
    }
}

fn empty(uri: &str) -> StoreRef {
    Arc::new(EmptyStore::new(uri))
}

impl StoreResolver for MetaStore {
    fn resolve(&self, uri: &str) -> StoreRef {
        match self.namespaces.classify(uri) {
            NamespaceRef::SelfRoot => self.resolve_self(uri, None),
            NamespaceRef::SelfDevice(device) => self.resolve_self(uri, Some(device)),
            NamespaceRef::User { account, path } if account == self.messaging.identity() => {
                self.resolve_self(uri, path)
            }
            NamespaceRef::User { account, .. } => self.resolve_remote(
                uri,
                PeerAddress::Account(account.to_owned()),
                self.namespaces.user(account),
            ),
            NamespaceRef::Feed { feed, .. } => self.resolve_remote(
                uri,
                PeerAddress::Feed(feed.to_owned()),
                self.namespaces.feed(feed),
            ),
            NamespaceRef::Foreign => empty(uri),
        }
    }
}

impl Debug for MetaStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("account", &self.messaging.identity())
            .field("devices", &self.devices.read().len())
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use crate::protocol::PROTOCOL_VERSION;
    use datashare_common::Store;
    use datashare_storage::{LocalStore, MemoryGraphDatabase};

    fn local(uri: &str) -> StoreRef {
        Arc::new(LocalStore::new(uri, Arc::new(MemoryGraphDatabase::new(uri))))
    }

    fn metastore() -> MetaStore {
        let ns = Namespaces::default();
        let network = MemoryNetwork::new();
        let metastore = MetaStore::new(
            ns.clone(),
            Protocol::new(ns.base(), PROTOCOL_VERSION),
            network.endpoint("alice"),
            local(&ns.me()),
        );
        metastore.add_device("phone", local(&ns.device("phone")));
        metastore
    }

    #[test]
    fn self_namespaces() {
        let metastore = metastore();
        let ns = metastore.namespaces().clone();

        let root = metastore.resolve(&ns.me());
        assert_eq!(root.uri(), ns.me());
        assert_eq!(format!("{root:?}").matches("LocalStore").count(), 2);

        assert_eq!(
            metastore.resolve(&ns.device("phone")).uri(),
            ns.device("phone")
        );
        let watch = metastore.resolve(&ns.device("watch"));
        assert!(format!("{watch:?}").starts_with("EmptyStore"));

        let own = metastore.resolve(&format!("{}/phone", ns.user("alice")));
        assert_eq!(own.uri(), ns.device("phone"));

        assert!(metastore.remove_device("phone").is_some());
        let phone = metastore.resolve(&ns.device("phone"));
        assert!(format!("{phone:?}").starts_with("EmptyStore"));
    }

    #[test]
    fn remote_stores_are_cached() {
        let metastore = metastore();
        let ns = metastore.namespaces().clone();

        let bob = metastore.resolve(&ns.user("bob"));
        assert!(Arc::ptr_eq(&bob, &metastore.resolve(&ns.user("bob"))));
        let bob_phone = metastore.resolve(&format!("{}/phone", ns.user("bob")));
        assert!(!Arc::ptr_eq(&bob, &bob_phone));
        metastore.resolve(&ns.feed("family"));

        assert_eq!(metastore.proxy_count(), 3);
        assert_eq!(metastore.peers.len(), 2);
    }

    #[tokio::test]
    async fn unknown_namespaces_are_empty() {
        let metastore = metastore();
        for uri in ["http://example.com/graph", "http://datashare.local/rdf/other/x"] {
            let store = metastore.resolve(uri);
            store.add_ref().unwrap();
            let result = futures::TryStreamExt::try_collect::<Vec<_>>(store.get(&[])).await;
            assert!(result.unwrap().is_empty());
            store.unref();
        }
        assert_eq!(metastore.proxy_count(), 0);
    }
}
