use datashare_common::error::StorageError;
use datashare_common::StoreRef;
use datashare_storage::EmptyStore;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Maps a URI to the store that serves it.
///
/// Resolution never fails: a URI nobody serves resolves to an empty store. Resolving does not
/// take a reference on the returned store.
pub trait StoreResolver: Debug + Send + Sync {
    fn resolve(&self, uri: &str) -> StoreRef;
}

/// The stores opened for one query execution.
///
/// Every store is referenced at most once, no matter how often the query names it. Closing
/// releases each of them exactly once; afterward every lookup yields an empty store.
#[derive(Debug)]
pub struct OpenedStores {
    resolver: Arc<dyn StoreResolver>,
    stores: Mutex<Option<FxHashMap<String, StoreRef>>>,
}

impl OpenedStores {
    pub fn new(resolver: Arc<dyn StoreResolver>) -> Self {
        Self {
            resolver,
            stores: Mutex::new(Some(FxHashMap::default())),
        }
    }

    /// Resolves `uri` and takes a reference on the store unless this has already happened.
    pub fn open(&self, uri: &str) -> Result<StoreRef, StorageError> {
        let mut stores = self.stores.lock();
        let Some(stores) = stores.as_mut() else {
            return Err(StorageError::NotOpen(uri.to_owned()));
        };
        if let Some(store) = stores.get(uri) {
            return Ok(Arc::clone(store));
        }

        let store = self.resolver.resolve(uri);
        store.add_ref()?;
        tracing::trace!(uri, "Opened store");
        stores.insert(uri.to_owned(), Arc::clone(&store));
        Ok(store)
    }

    /// Returns the opened store for `uri`, or an empty store if it has not been opened.
    pub fn get(&self, uri: &str) -> StoreRef {
        let stores = self.stores.lock();
        match stores.as_ref().and_then(|stores| stores.get(uri)) {
            Some(store) => Arc::clone(store),
            None => {
                tracing::debug!(uri, "Store was not opened for this query");
                Arc::new(EmptyStore::new(uri))
            }
        }
    }

    /// The number of stores currently held.
    pub fn len(&self) -> usize {
        self.stores.lock().as_ref().map_or(0, FxHashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every opened store. Calling this more than once has no effect.
    pub fn close(&self) {
        let Some(stores) = self.stores.lock().take() else {
            return;
        };
        for (uri, store) in stores {
            tracing::trace!(uri, "Releasing store");
            store.unref();
        }
    }
}

impl Drop for OpenedStores {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use datashare_common::Store;
    use datashare_storage::{LocalStore, MemoryGraphDatabase};

    /// Resolves URIs to a fixed set of stores.
    #[derive(Debug, Default)]
    pub(crate) struct StaticResolver {
        stores: FxHashMap<String, StoreRef>,
    }

    impl StaticResolver {
        pub(crate) fn with(mut self, store: StoreRef) -> Self {
            self.stores.insert(store.uri().to_owned(), store);
            self
        }
    }

    impl StoreResolver for StaticResolver {
        fn resolve(&self, uri: &str) -> StoreRef {
            self.stores
                .get(uri)
                .map_or_else(|| Arc::new(EmptyStore::new(uri)) as StoreRef, Arc::clone)
        }
    }

    #[test]
    fn each_store_is_opened_once() {
        let local = Arc::new(LocalStore::new(
            "ex:local",
            Arc::new(MemoryGraphDatabase::new("ex:db")),
        ));
        let resolver = StaticResolver::default().with(Arc::clone(&local) as StoreRef);
        let stores = OpenedStores::new(Arc::new(resolver));

        stores.open("ex:local").unwrap();
        stores.open("ex:local").unwrap();
        stores.open("ex:unknown").unwrap();
        assert_eq!(local.ref_count(), 1);
        assert_eq!(stores.len(), 2);

        stores.close();
        stores.close();
        assert_eq!(local.ref_count(), 0);
        assert_eq!(stores.get("ex:local").uri(), "ex:local");
        assert!(stores.open("ex:local").is_err());
    }

    #[test]
    fn dropping_releases_stores() {
        let local = Arc::new(LocalStore::new(
            "ex:local",
            Arc::new(MemoryGraphDatabase::new("ex:db")),
        ));
        let resolver = StaticResolver::default().with(Arc::clone(&local) as StoreRef);
        {
            let stores = OpenedStores::new(Arc::new(resolver));
            stores.open("ex:local").unwrap();
            assert_eq!(local.ref_count(), 1);
        }
        assert_eq!(local.ref_count(), 0);
    }
}
