use crate::algebra::{AggregateExpression, GraphNamePattern, GraphPattern, OrderExpression};
use crate::error::QueryEvaluationError;
use crate::expression::Expression;
use crate::join::{JoinKind, NestedLoopJoin, StreamFactory};
use crate::{modifiers, EvaluationContext};
use datashare_common::{
    empty_stream, union_streams, BindingStream, BindingTransform, StoreRef, UnionStream,
};
use datashare_model::{Binding, Constant, TriplePattern, Variable};
use futures::{future, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The operator of a [QueryNode].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Empty,
    Bgp {
        patterns: Vec<TriplePattern>,
    },
    Join {
        left: Arc<QueryNode>,
        right: Arc<QueryNode>,
    },
    LeftJoin {
        left: Arc<QueryNode>,
        right: Arc<QueryNode>,
    },
    Minus {
        left: Arc<QueryNode>,
        right: Arc<QueryNode>,
    },
    Union {
        left: Arc<QueryNode>,
        right: Arc<QueryNode>,
    },
    Filter {
        inner: Arc<QueryNode>,
        expression: Expression,
    },
    Extend {
        inner: Arc<QueryNode>,
        variable: Variable,
        expression: Expression,
    },
    Graph {
        inner: Arc<QueryNode>,
        name: GraphNamePattern,
    },
    Project {
        inner: Arc<QueryNode>,
        variables: Vec<Variable>,
    },
    Distinct {
        inner: Arc<QueryNode>,
    },
    OrderBy {
        inner: Arc<QueryNode>,
        keys: Vec<OrderExpression>,
    },
    Slice {
        inner: Arc<QueryNode>,
        start: usize,
        length: Option<usize>,
    },
    Group {
        inner: Arc<QueryNode>,
        variables: Vec<Variable>,
        aggregates: Vec<(Variable, AggregateExpression)>,
    },
}

impl NodeKind {
    /// Returns the direct children of this node.
    pub fn children(&self) -> Vec<&Arc<QueryNode>> {
        match self {
            NodeKind::Empty | NodeKind::Bgp { .. } => Vec::new(),
            NodeKind::Join { left, right }
            | NodeKind::LeftJoin { left, right }
            | NodeKind::Minus { left, right }
            | NodeKind::Union { left, right } => vec![left, right],
            NodeKind::Filter { inner, .. }
            | NodeKind::Extend { inner, .. }
            | NodeKind::Graph { inner, .. }
            | NodeKind::Project { inner, .. }
            | NodeKind::Distinct { inner }
            | NodeKind::OrderBy { inner, .. }
            | NodeKind::Slice { inner, .. }
            | NodeKind::Group { inner, .. } => vec![inner],
        }
    }

    /// Returns a copy of this node with every child replaced by `f(child)`.
    pub fn map_children<E>(
        &self,
        mut f: impl FnMut(&Arc<QueryNode>) -> Result<Arc<QueryNode>, E>,
    ) -> Result<NodeKind, E> {
        Ok(match self {
            NodeKind::Empty => NodeKind::Empty,
            NodeKind::Bgp { patterns } => NodeKind::Bgp {
                patterns: patterns.clone(),
            },
            NodeKind::Join { left, right } => NodeKind::Join {
                left: f(left)?,
                right: f(right)?,
            },
            NodeKind::LeftJoin { left, right } => NodeKind::LeftJoin {
                left: f(left)?,
                right: f(right)?,
            },
            NodeKind::Minus { left, right } => NodeKind::Minus {
                left: f(left)?,
                right: f(right)?,
            },
            NodeKind::Union { left, right } => NodeKind::Union {
                left: f(left)?,
                right: f(right)?,
            },
            NodeKind::Filter { inner, expression } => NodeKind::Filter {
                inner: f(inner)?,
                expression: expression.clone(),
            },
            NodeKind::Extend {
                inner,
                variable,
                expression,
            } => NodeKind::Extend {
                inner: f(inner)?,
                variable: variable.clone(),
                expression: expression.clone(),
            },
            NodeKind::Graph { inner, name } => NodeKind::Graph {
                inner: f(inner)?,
                name: name.clone(),
            },
            NodeKind::Project { inner, variables } => NodeKind::Project {
                inner: f(inner)?,
                variables: variables.clone(),
            },
            NodeKind::Distinct { inner } => NodeKind::Distinct { inner: f(inner)? },
            NodeKind::OrderBy { inner, keys } => NodeKind::OrderBy {
                inner: f(inner)?,
                keys: keys.clone(),
            },
            NodeKind::Slice {
                inner,
                start,
                length,
            } => NodeKind::Slice {
                inner: f(inner)?,
                start: *start,
                length: *length,
            },
            NodeKind::Group {
                inner,
                variables,
                aggregates,
            } => NodeKind::Group {
                inner: f(inner)?,
                variables: variables.clone(),
                aggregates: aggregates.clone(),
            },
        })
    }
}

/// A node of an executable query tree.
///
/// The scope (the variables a node may bind in its output) is computed when the node is created.
/// Construction fails if the tree binds a variable twice or refers to a variable nothing binds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryNode {
    kind: NodeKind,
    scope: BTreeSet<Variable>,
}

impl QueryNode {
    /// Creates a node, computing its scope from the scopes of its children.
    pub fn try_new(kind: NodeKind) -> Result<Self, QueryEvaluationError> {
        let scope = compute_scope(&kind)?;
        Ok(Self { kind, scope })
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn scope(&self) -> &BTreeSet<Variable> {
        &self.scope
    }

    /// The store URIs named by fixed `graph` patterns in this tree.
    pub fn graph_uris(&self) -> BTreeSet<String> {
        let mut uris = BTreeSet::new();
        self.visit(&mut |node| {
            if let NodeKind::Graph {
                name: GraphNamePattern::Uri(uri),
                ..
            } = &node.kind
            {
                uris.insert(uri.clone());
            }
        });
        uris
    }

    /// Whether this tree contains a `graph` pattern over a variable.
    pub fn has_variable_graph(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            found |= matches!(
                node.kind,
                NodeKind::Graph {
                    name: GraphNamePattern::Variable(_),
                    ..
                }
            );
        });
        found
    }

    fn visit(&self, f: &mut impl FnMut(&QueryNode)) {
        f(self);
        for child in self.kind.children() {
            child.visit(f);
        }
    }

    /// Evaluates this node against `store`.
    ///
    /// Stores named by `graph` patterns are looked up in the `context`; they must have been
    /// opened before.
    pub fn evaluate(&self, context: &EvaluationContext, store: &StoreRef) -> BindingStream {
        match &self.kind {
            NodeKind::Empty => empty_stream(),
            NodeKind::Bgp { patterns } => store.get(patterns),
            NodeKind::Join { left, right } => {
                evaluate_join(JoinKind::Inner, left, right, context, store)
            }
            NodeKind::LeftJoin { left, right } => {
                evaluate_join(JoinKind::Left, left, right, context, store)
            }
            NodeKind::Minus { left, right } => {
                evaluate_join(JoinKind::Minus, left, right, context, store)
            }
            NodeKind::Union { left, right } => union_streams(vec![
                left.evaluate(context, store),
                right.evaluate(context, store),
            ]),
            NodeKind::Filter { inner, expression } => {
                let evaluator = Arc::clone(context.evaluator());
                let expression = expression.clone();
                inner
                    .evaluate(context, store)
                    .try_filter(move |binding| {
                        let keep = evaluator
                            .evaluate(&expression, binding)
                            .is_ok_and(|value| value.effective_boolean_value());
                        future::ready(keep)
                    })
                    .boxed()
            }
            NodeKind::Extend {
                inner,
                variable,
                expression,
            } => {
                let evaluator = Arc::clone(context.evaluator());
                let variable = variable.clone();
                let expression = expression.clone();
                inner
                    .evaluate(context, store)
                    .try_filter_map(move |mut binding| {
                        let result = match evaluator.evaluate(&expression, &binding) {
                            Ok(value) => {
                                binding.insert(variable.clone(), value.into_constant());
                                Some(binding)
                            }
                            Err(error) => {
                                tracing::warn!(%variable, %error, "Dropping binding, bind expression failed");
                                None
                            }
                        };
                        future::ready(Ok(result))
                    })
                    .boxed()
            }
            NodeKind::Graph {
                inner,
                name: GraphNamePattern::Uri(uri),
            } => inner.evaluate(context, &context.store(uri)),
            NodeKind::Graph {
                inner,
                name: GraphNamePattern::Variable(variable),
            } => evaluate_variable_graph(inner, variable, context),
            NodeKind::Project { inner, variables } => {
                let variables = variables.clone();
                inner
                    .evaluate(context, store)
                    .map_ok(move |binding| binding.project(&variables))
                    .boxed()
            }
            NodeKind::Distinct { inner } => modifiers::distinct(inner.evaluate(context, store)),
            NodeKind::OrderBy { inner, keys } => modifiers::order_by(
                inner.evaluate(context, store),
                keys.clone(),
                Arc::clone(context.evaluator()),
            ),
            NodeKind::Slice {
                inner,
                start,
                length,
            } => modifiers::slice(inner.evaluate(context, store), *start, *length),
            NodeKind::Group {
                inner,
                variables,
                aggregates,
            } => modifiers::group(
                inner.evaluate(context, store),
                variables.clone(),
                aggregates.clone(),
                Arc::clone(context.evaluator()),
            ),
        }
    }
}

impl TryFrom<&GraphPattern> for QueryNode {
    type Error = QueryEvaluationError;

    fn try_from(pattern: &GraphPattern) -> Result<Self, Self::Error> {
        let node = |pattern: &GraphPattern| QueryNode::try_from(pattern).map(Arc::new);
        let kind = match pattern {
            GraphPattern::Empty => NodeKind::Empty,
            GraphPattern::Bgp { patterns } => NodeKind::Bgp {
                patterns: patterns.clone(),
            },
            GraphPattern::Join { left, right } => NodeKind::Join {
                left: node(left)?,
                right: node(right)?,
            },
            GraphPattern::LeftJoin { left, right } => NodeKind::LeftJoin {
                left: node(left)?,
                right: node(right)?,
            },
            GraphPattern::Minus { left, right } => NodeKind::Minus {
                left: node(left)?,
                right: node(right)?,
            },
            GraphPattern::Union { left, right } => NodeKind::Union {
                left: node(left)?,
                right: node(right)?,
            },
            GraphPattern::Filter { expression, inner } => NodeKind::Filter {
                inner: node(inner)?,
                expression: expression.clone(),
            },
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => NodeKind::Extend {
                inner: node(inner)?,
                variable: variable.clone(),
                expression: expression.clone(),
            },
            GraphPattern::Graph { name, inner } => NodeKind::Graph {
                inner: node(inner)?,
                name: name.clone(),
            },
            GraphPattern::Project { inner, variables } => NodeKind::Project {
                inner: node(inner)?,
                variables: variables.clone(),
            },
            GraphPattern::Distinct { inner } => NodeKind::Distinct {
                inner: node(inner)?,
            },
            GraphPattern::OrderBy { inner, expression } => NodeKind::OrderBy {
                inner: node(inner)?,
                keys: expression.clone(),
            },
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => NodeKind::Slice {
                inner: node(inner)?,
                start: *start,
                length: *length,
            },
            GraphPattern::Group {
                inner,
                variables,
                aggregates,
            } => NodeKind::Group {
                inner: node(inner)?,
                variables: variables.clone(),
                aggregates: aggregates.clone(),
            },
        };
        QueryNode::try_new(kind)
    }
}

fn compute_scope(kind: &NodeKind) -> Result<BTreeSet<Variable>, QueryEvaluationError> {
    Ok(match kind {
        NodeKind::Empty => BTreeSet::new(),
        NodeKind::Bgp { patterns } => patterns
            .iter()
            .flat_map(TriplePattern::variables)
            .cloned()
            .collect(),
        NodeKind::Join { left, right }
        | NodeKind::LeftJoin { left, right }
        | NodeKind::Union { left, right } => left.scope.union(&right.scope).cloned().collect(),
        NodeKind::Minus { left, .. } => left.scope.clone(),
        NodeKind::Filter { inner, .. }
        | NodeKind::Distinct { inner }
        | NodeKind::OrderBy { inner, .. }
        | NodeKind::Slice { inner, .. } => inner.scope.clone(),
        NodeKind::Extend {
            inner, variable, ..
        } => {
            let mut scope = inner.scope.clone();
            if !scope.insert(variable.clone()) {
                return Err(QueryEvaluationError::VariableAlreadyInScope(
                    variable.clone(),
                ));
            }
            scope
        }
        NodeKind::Graph { inner, name } => {
            let mut scope = inner.scope.clone();
            if let GraphNamePattern::Variable(variable) = name {
                scope.insert(variable.clone());
            }
            scope
        }
        NodeKind::Project { inner, variables } => {
            ensure_in_scope(&inner.scope, variables)?;
            variables.iter().cloned().collect()
        }
        NodeKind::Group {
            inner,
            variables,
            aggregates,
        } => {
            ensure_in_scope(&inner.scope, variables)?;
            let mut scope = variables.iter().cloned().collect::<BTreeSet<_>>();
            for (variable, _) in aggregates {
                if !scope.insert(variable.clone()) {
                    return Err(QueryEvaluationError::VariableAlreadyInScope(
                        variable.clone(),
                    ));
                }
            }
            scope
        }
    })
}

fn ensure_in_scope(
    scope: &BTreeSet<Variable>,
    variables: &[Variable],
) -> Result<(), QueryEvaluationError> {
    match variables.iter().find(|variable| !scope.contains(*variable)) {
        Some(variable) => Err(QueryEvaluationError::VariableNotInScope(variable.clone())),
        None => Ok(()),
    }
}

fn evaluate_join(
    kind: JoinKind,
    left: &QueryNode,
    right: &Arc<QueryNode>,
    context: &EvaluationContext,
    store: &StoreRef,
) -> BindingStream {
    let left = left.evaluate(context, store);
    let right_node = Arc::clone(right);
    let right_context = context.clone();
    let right_store = Arc::clone(store);
    let right: StreamFactory =
        Box::new(move || right_node.evaluate(&right_context, &right_store));
    NestedLoopJoin::new(kind, left, right, context.config().join_buffer_capacity()).boxed()
}

/// Evaluates `inner` once per named store and merges the results.
///
/// If `inner` binds `variable` itself, only solutions that bind it to the store's URI are kept.
/// Otherwise, the variable is bound to the store's URI.
fn evaluate_variable_graph(
    inner: &QueryNode,
    variable: &Variable,
    context: &EvaluationContext,
) -> BindingStream {
    let named = context.named_graphs();
    let uris = named
        .iter()
        .map(|uri| Constant::new(uri.as_str()))
        .collect::<Vec<_>>();
    let streams = named
        .iter()
        .map(|uri| inner.evaluate(context, &context.store(uri)))
        .collect::<Vec<_>>();

    let filter_only = inner.scope.contains(variable);
    let variable = variable.clone();
    let transform: BindingTransform = Arc::new(move |index: usize, mut binding: Binding| {
        let uri = uris.get(index)?;
        if filter_only {
            (binding.get(&variable) == Some(uri)).then_some(binding)
        } else {
            binding.insert(variable.clone(), uri.clone());
            Some(binding)
        }
    });
    Box::pin(UnionStream::new(streams, Some(transform)))
}
