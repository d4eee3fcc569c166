use datashare_common::error::StorageError;
use datashare_common::{empty_stream, BindingStream, Store};
use datashare_model::TriplePattern;

/// A store without any facts.
///
/// Unknown and unreachable namespaces resolve to an [EmptyStore], so that a query touching them
/// yields no results instead of failing.
#[derive(Clone, Debug)]
pub struct EmptyStore {
    uri: String,
}

impl EmptyStore {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl Store for EmptyStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn add_ref(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn unref(&self) {}

    fn get(&self, _patterns: &[TriplePattern]) -> BindingStream {
        empty_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datashare_model::Fact;
    use futures::StreamExt;

    #[tokio::test]
    async fn ends_immediately() {
        let store = EmptyStore::new("http://example.com/unknown");
        let pattern = TriplePattern::parse("?s", "?p", "?o").unwrap();
        assert!(store.get(&[pattern]).next().await.is_none());
    }

    #[tokio::test]
    async fn put_is_not_permitted() {
        let store = EmptyStore::new("http://example.com/unknown");
        let result = store.put(vec![Fact::new("ex:a", "ex:b", "ex:c")]).await;
        assert!(matches!(result, Err(StorageError::NotPermitted { .. })));
    }
}
