//! The query algebra handed to the engine by a query parser.

use crate::expression::Expression;
use datashare_model::{TriplePattern, Variable};

/// The name of a `graph` pattern: either a fixed store URI or a variable ranging over the
/// named stores of the [Dataset].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphNamePattern {
    Uri(String),
    Variable(Variable),
}

/// An aggregate computed by [GraphPattern::Group].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AggregateExpression {
    /// Counts the solutions of a group. With an expression, only solutions for which it
    /// evaluates without error are counted.
    Count {
        expression: Option<Expression>,
        distinct: bool,
    },
    /// Sums the integer values of an expression.
    Sum {
        expression: Expression,
        distinct: bool,
    },
}

/// A sort key of [GraphPattern::OrderBy].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderExpression {
    Asc(Expression),
    Desc(Expression),
}

impl OrderExpression {
    pub fn expression(&self) -> &Expression {
        match self {
            OrderExpression::Asc(expression) | OrderExpression::Desc(expression) => expression,
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, OrderExpression::Desc(_))
    }
}

/// A graph pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphPattern {
    /// A pattern without solutions.
    Empty,
    /// A basic graph pattern: a conjunction of triple patterns.
    Bgp { patterns: Vec<TriplePattern> },
    Join {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
    },
    /// `OPTIONAL`.
    LeftJoin {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
    },
    Minus {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
    },
    Union {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
    },
    Filter {
        expression: Expression,
        inner: Box<GraphPattern>,
    },
    /// `BIND(expression AS ?variable)`.
    Extend {
        inner: Box<GraphPattern>,
        variable: Variable,
        expression: Expression,
    },
    Graph {
        name: GraphNamePattern,
        inner: Box<GraphPattern>,
    },
    Project {
        inner: Box<GraphPattern>,
        variables: Vec<Variable>,
    },
    Distinct {
        inner: Box<GraphPattern>,
    },
    OrderBy {
        inner: Box<GraphPattern>,
        expression: Vec<OrderExpression>,
    },
    /// `OFFSET start LIMIT length`.
    Slice {
        inner: Box<GraphPattern>,
        start: usize,
        length: Option<usize>,
    },
    Group {
        inner: Box<GraphPattern>,
        variables: Vec<Variable>,
        aggregates: Vec<(Variable, AggregateExpression)>,
    },
}

impl GraphPattern {
    pub fn bgp(patterns: impl IntoIterator<Item = TriplePattern>) -> Self {
        Self::Bgp {
            patterns: patterns.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn join(self, right: GraphPattern) -> Self {
        Self::Join {
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn left_join(self, right: GraphPattern) -> Self {
        Self::LeftJoin {
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn minus(self, right: GraphPattern) -> Self {
        Self::Minus {
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn union(self, right: GraphPattern) -> Self {
        Self::Union {
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn filter(self, expression: Expression) -> Self {
        Self::Filter {
            expression,
            inner: Box::new(self),
        }
    }

    #[must_use]
    pub fn extend(self, variable: Variable, expression: Expression) -> Self {
        Self::Extend {
            inner: Box::new(self),
            variable,
            expression,
        }
    }

    #[must_use]
    pub fn graph(self, name: GraphNamePattern) -> Self {
        Self::Graph {
            name,
            inner: Box::new(self),
        }
    }

    #[must_use]
    pub fn project(self, variables: impl IntoIterator<Item = Variable>) -> Self {
        Self::Project {
            inner: Box::new(self),
            variables: variables.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn distinct(self) -> Self {
        Self::Distinct {
            inner: Box::new(self),
        }
    }

    #[must_use]
    pub fn order_by(self, expression: impl IntoIterator<Item = OrderExpression>) -> Self {
        Self::OrderBy {
            inner: Box::new(self),
            expression: expression.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn slice(self, start: usize, length: Option<usize>) -> Self {
        Self::Slice {
            inner: Box::new(self),
            start,
            length,
        }
    }

    #[must_use]
    pub fn group(
        self,
        variables: impl IntoIterator<Item = Variable>,
        aggregates: impl IntoIterator<Item = (Variable, AggregateExpression)>,
    ) -> Self {
        Self::Group {
            inner: Box::new(self),
            variables: variables.into_iter().collect(),
            aggregates: aggregates.into_iter().collect(),
        }
    }
}

/// The stores a query runs against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dataset {
    /// The store that patterns outside of a `graph` pattern are evaluated against.
    pub default: String,
    /// The stores a `graph ?g` pattern ranges over.
    pub named: Vec<String>,
}

impl Dataset {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            named: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_named(mut self, uri: impl Into<String>) -> Self {
        self.named.push(uri.into());
        self
    }
}

/// A `SELECT` query.
///
/// Projection and solution modifiers are part of the pattern tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SelectQuery {
    pub pattern: GraphPattern,
    pub dataset: Dataset,
}

impl SelectQuery {
    pub fn new(pattern: GraphPattern, dataset: Dataset) -> Self {
        Self { pattern, dataset }
    }
}
