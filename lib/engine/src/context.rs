use crate::expression::{DefaultExpressionEvaluator, ExpressionEvaluatorRef};
use crate::{EvaluationConfig, OpenedStores};
use datashare_common::StoreRef;
use std::sync::Arc;

/// Everything a [QueryNode](crate::QueryNode) needs besides its default store during
/// evaluation.
#[derive(Clone, Debug)]
pub struct EvaluationContext {
    config: EvaluationConfig,
    stores: Arc<OpenedStores>,
    evaluator: ExpressionEvaluatorRef,
    named_graphs: Arc<[String]>,
}

impl EvaluationContext {
    pub fn new(config: EvaluationConfig, stores: Arc<OpenedStores>) -> Self {
        Self {
            config,
            stores,
            evaluator: Arc::new(DefaultExpressionEvaluator),
            named_graphs: Vec::new().into(),
        }
    }

    #[must_use]
    pub fn with_expression_evaluator(mut self, evaluator: ExpressionEvaluatorRef) -> Self {
        self.evaluator = evaluator;
        self
    }

    #[must_use]
    pub fn with_named_graphs(mut self, named_graphs: impl IntoIterator<Item = String>) -> Self {
        self.named_graphs = named_graphs.into_iter().collect();
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &ExpressionEvaluatorRef {
        &self.evaluator
    }

    /// The stores a variable `graph` pattern ranges over.
    pub fn named_graphs(&self) -> &[String] {
        &self.named_graphs
    }

    /// Returns the store opened for `uri`.
    pub fn store(&self, uri: &str) -> StoreRef {
        self.stores.get(uri)
    }
}
