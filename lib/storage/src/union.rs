use datashare_common::error::StorageError;
use datashare_common::{union_streams, BindingStream, Store, StoreRef};
use datashare_model::TriplePattern;

/// A read-only store that combines several stores.
///
/// Queries are sent to every child and the results are merged without deduplication. References
/// are forwarded to all children.
#[derive(Debug)]
pub struct UnionStore {
    uri: String,
    children: Vec<StoreRef>,
}

impl UnionStore {
    pub fn new(uri: impl Into<String>, children: Vec<StoreRef>) -> Self {
        Self {
            uri: uri.into(),
            children,
        }
    }

    pub fn children(&self) -> &[StoreRef] {
        &self.children
    }
}

impl Store for UnionStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn add_ref(&self) -> Result<(), StorageError> {
        for (i, child) in self.children.iter().enumerate() {
            if let Err(error) = child.add_ref() {
                for opened in &self.children[..i] {
                    opened.unref();
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn unref(&self) {
        for child in &self.children {
            child.unref();
        }
    }

    fn get(&self, patterns: &[TriplePattern]) -> BindingStream {
        union_streams(
            self.children
                .iter()
                .map(|child| child.get(patterns))
                .collect(),
        )
    }
}
