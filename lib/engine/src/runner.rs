use crate::error::QueryEvaluationError;
use crate::expression::{DefaultExpressionEvaluator, ExpressionEvaluatorRef};
use crate::{
    push_down_projections, EvaluationConfig, EvaluationContext, OpenedStores, QueryNode,
    SelectQuery, StoreResolver,
};
use datashare_common::BindingStream;
use datashare_model::{Binding, Variable};
use futures::stream::{AbortHandle, Abortable};
use futures::{Stream, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Runs `SELECT` queries against the stores of a [StoreResolver].
#[derive(Clone, Debug)]
pub struct SelectRunner {
    resolver: Arc<dyn StoreResolver>,
    config: EvaluationConfig,
    evaluator: ExpressionEvaluatorRef,
}

impl SelectRunner {
    pub fn new(resolver: Arc<dyn StoreResolver>, config: EvaluationConfig) -> Self {
        Self {
            resolver,
            config,
            evaluator: Arc::new(DefaultExpressionEvaluator),
        }
    }

    #[must_use]
    pub fn with_expression_evaluator(mut self, evaluator: ExpressionEvaluatorRef) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Starts evaluating `query`.
    ///
    /// Every store the query names is resolved and referenced before this returns. The references
    /// are released when the returned stream ends, fails, is aborted or is dropped.
    ///
    /// Fails if the query tree is invalid or a store cannot be opened. In the latter case, the
    /// stores opened so far are released again.
    pub fn execute(&self, query: &SelectQuery) -> Result<QuerySolutionStream, QueryEvaluationError> {
        tracing::debug!(default = %query.dataset.default, "Executing select query");

        let node = Arc::new(QueryNode::try_from(&query.pattern)?);
        let node = push_down_projections(&node)?;

        let mut uris = BTreeSet::from([query.dataset.default.clone()]);
        uris.extend(node.graph_uris());
        if node.has_variable_graph() {
            uris.extend(query.dataset.named.iter().cloned());
        }

        let stores = Arc::new(OpenedStores::new(Arc::clone(&self.resolver)));
        for uri in &uris {
            if let Err(error) = stores.open(uri) {
                stores.close();
                return Err(error.into());
            }
        }

        let context = EvaluationContext::new(self.config.clone(), Arc::clone(&stores))
            .with_expression_evaluator(Arc::clone(&self.evaluator))
            .with_named_graphs(query.dataset.named.iter().cloned());
        let default_store = context.store(&query.dataset.default);
        let stream = node.evaluate(&context, &default_store);

        Ok(QuerySolutionStream::new(
            node.scope().iter().cloned().collect(),
            stream,
            stores,
        ))
    }
}

/// The solutions of a query.
///
/// The stores of the query stay referenced until the stream has ended, failed, been aborted
/// through its [AbortHandle] or been dropped, whichever comes first.
pub struct QuerySolutionStream {
    variables: Arc<[Variable]>,
    /// [None] once the stream has terminated.
    inner: Option<Abortable<BindingStream>>,
    abort_handle: AbortHandle,
    stores: Arc<OpenedStores>,
}

impl QuerySolutionStream {
    fn new(variables: Arc<[Variable]>, inner: BindingStream, stores: Arc<OpenedStores>) -> Self {
        let (abort_handle, registration) = AbortHandle::new_pair();
        Self {
            variables,
            inner: Some(Abortable::new(inner, registration)),
            abort_handle,
            stores,
        }
    }

    /// The variables the solutions may bind.
    pub fn variables(&self) -> &[Variable] {
        self.variables.as_ref()
    }

    /// Returns a handle that stops the evaluation. After aborting, the stream ends without
    /// further solutions.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Collects all solutions.
    pub async fn try_collect_to_vec(self) -> Result<Vec<Binding>, QueryEvaluationError> {
        self.try_collect().await
    }

    fn terminate(&mut self) {
        self.inner = None;
        self.stores.close();
    }
}

impl Stream for QuerySolutionStream {
    type Item = Result<Binding, QueryEvaluationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(inner.poll_next_unpin(cx)) {
            Some(Ok(binding)) => Poll::Ready(Some(Ok(binding))),
            Some(Err(error)) => {
                self.terminate();
                Poll::Ready(Some(Err(error.into())))
            }
            None => {
                self.terminate();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for QuerySolutionStream {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{GraphNamePattern, GraphPattern};
    use crate::stores::tests::StaticResolver;
    use crate::Dataset;
    use datashare_common::error::StorageError;
    use datashare_common::{Store, StoreRef};
    use datashare_model::{Constant, Fact, TriplePattern};
    use datashare_storage::{LocalStore, MemoryGraphDatabase};

    fn tp(s: &str, p: &str, o: &str) -> TriplePattern {
        TriplePattern::parse(s, p, o).unwrap()
    }

    fn local(uri: &str, facts: Vec<Fact>) -> Arc<LocalStore> {
        Arc::new(LocalStore::new(
            uri,
            Arc::new(MemoryGraphDatabase::with_facts(uri, facts)),
        ))
    }

    fn runner(stores: &[Arc<LocalStore>]) -> SelectRunner {
        let resolver = stores
            .iter()
            .map(|store| Arc::clone(store) as StoreRef)
            .fold(StaticResolver::default(), StaticResolver::with);
        SelectRunner::new(Arc::new(resolver), EvaluationConfig::default())
    }

    #[tokio::test]
    async fn stores_are_released_after_completion() {
        let a = local("ex:A", vec![Fact::new("ex:t1", "ex:p", "ex:o")]);
        let b = local("ex:B", vec![Fact::new("ex:t2", "ex:p", "ex:o")]);
        let runner = runner(&[Arc::clone(&a), Arc::clone(&b)]);
        let pattern = GraphPattern::bgp([tp("?s", "ex:p", "ex:o")])
            .graph(GraphNamePattern::Variable(Variable::new_unchecked("g")));
        let query = SelectQuery::new(pattern, Dataset::new("ex:A").with_named("ex:B"));

        let solutions = runner.execute(&query).unwrap();
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 1);
        assert_eq!(solutions.variables().len(), 2);

        let result = solutions.try_collect_to_vec().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].get(&Variable::new_unchecked("g")),
            Some(&Constant::new("ex:B"))
        );
        assert_eq!(a.ref_count(), 0);
        assert_eq!(b.ref_count(), 0);
    }

    #[tokio::test]
    async fn stores_are_released_on_drop() {
        let a = local("ex:A", vec![Fact::new("ex:t1", "ex:p", "ex:o")]);
        let runner = runner(&[Arc::clone(&a)]);
        let query = SelectQuery::new(
            GraphPattern::bgp([tp("?s", "?p", "?o")]),
            Dataset::new("ex:A"),
        );

        let solutions = runner.execute(&query).unwrap();
        assert_eq!(a.ref_count(), 1);
        drop(solutions);
        assert_eq!(a.ref_count(), 0);
    }

    #[tokio::test]
    async fn abort_ends_the_stream() {
        let a = local(
            "ex:A",
            (0..10)
                .map(|i| Fact::new(format!("ex:t{i}"), "ex:p", "ex:o"))
                .collect(),
        );
        let runner = runner(&[Arc::clone(&a)]);
        let query = SelectQuery::new(
            GraphPattern::bgp([tp("?s", "ex:p", "ex:o")]),
            Dataset::new("ex:A"),
        );

        let mut solutions = runner.execute(&query).unwrap();
        assert!(solutions.next().await.is_some());
        solutions.abort_handle().abort();
        assert!(solutions.next().await.is_none());
        assert_eq!(a.ref_count(), 0);
    }

    #[tokio::test]
    async fn unknown_default_store_yields_nothing() {
        let runner = runner(&[]);
        let query = SelectQuery::new(
            GraphPattern::bgp([tp("?s", "?p", "?o")]),
            Dataset::new("ex:nowhere"),
        );
        let result = runner.execute(&query).unwrap().try_collect_to_vec().await;
        assert!(result.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_before_opening_stores() {
        let a = local("ex:A", Vec::new());
        let runner = runner(&[Arc::clone(&a)]);
        let pattern = GraphPattern::bgp([tp("?s", "?p", "?o")])
            .project([Variable::new_unchecked("missing")]);

        let result = runner.execute(&SelectQuery::new(pattern, Dataset::new("ex:A")));

        assert!(matches!(
            result,
            Err(QueryEvaluationError::VariableNotInScope(_))
        ));
        assert_eq!(a.ref_count(), 0);
        assert_eq!(a.uri(), "ex:A");
    }

    /// A store whose database cannot be opened.
    #[derive(Debug)]
    struct BrokenStore;

    impl Store for BrokenStore {
        fn uri(&self) -> &str {
            "ex:broken"
        }

        fn add_ref(&self) -> Result<(), StorageError> {
            Err(StorageError::NotOpen("ex:broken".to_owned()))
        }

        fn unref(&self) {}

        fn get(&self, _patterns: &[TriplePattern]) -> BindingStream {
            datashare_common::empty_stream()
        }
    }

    #[tokio::test]
    async fn failing_open_releases_opened_stores() {
        let a = local("ex:A", Vec::new());
        let resolver = StaticResolver::default()
            .with(Arc::clone(&a) as StoreRef)
            .with(Arc::new(BrokenStore));
        let runner = SelectRunner::new(Arc::new(resolver), EvaluationConfig::default());
        let pattern = GraphPattern::bgp([tp("?s", "?p", "?o")])
            .graph(GraphNamePattern::Uri("ex:broken".to_owned()));

        let result = runner.execute(&SelectQuery::new(pattern, Dataset::new("ex:A")));

        assert!(matches!(result, Err(QueryEvaluationError::Storage(_))));
        assert_eq!(a.ref_count(), 0);
    }
}
