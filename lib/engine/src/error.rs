use datashare_common::error::StorageError;
use datashare_model::Variable;

/// An error while building or evaluating a query.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryEvaluationError {
    /// An error from a store.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An `Extend` or an aggregate would bind a variable that is already bound.
    #[error("The variable {0} is already in scope")]
    VariableAlreadyInScope(Variable),
    /// A projection or grouping refers to a variable that no pattern binds.
    #[error("The variable {0} is not in scope")]
    VariableNotInScope(Variable),
}

/// An error while evaluating an expression against a single binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExpressionError {
    /// The expression reads a variable that the binding does not contain.
    #[error("The variable {0} is unbound")]
    UnboundVariable(Variable),
    /// The operands do not have the types the operator expects.
    #[error("Type error in {operation}: {message}")]
    TypeMismatch {
        operation: &'static str,
        message: String,
    },
    /// An integer operation overflowed.
    #[error("Integer overflow in {0}")]
    Overflow(&'static str),
}

impl ExpressionError {
    pub(crate) fn type_mismatch(operation: &'static str, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            operation,
            message: message.into(),
        }
    }
}
