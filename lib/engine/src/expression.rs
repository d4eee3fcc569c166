//! Expressions used by `Filter`, `Extend`, `OrderBy` and aggregates.

use crate::error::ExpressionError;
use datashare_model::vocab::XSD_INTEGER;
use datashare_model::{Binding, Constant, Variable};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// An expression over the variables of a binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expression {
    Variable(Variable),
    Constant(Constant),
    Integer(i64),
    Add(Box<Expression>, Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    Less(Box<Expression>, Box<Expression>),
    Greater(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// Whether the variable is bound.
    Bound(Variable),
}

impl Expression {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(Variable::new_unchecked(name))
    }

    pub fn constant(value: impl Into<String>) -> Self {
        Self::Constant(Constant::new(value))
    }

    #[must_use]
    pub fn add(self, other: Expression) -> Self {
        Self::Add(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn equal(self, other: Expression) -> Self {
        Self::Equal(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn not_equal(self, other: Expression) -> Self {
        Self::NotEqual(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn less(self, other: Expression) -> Self {
        Self::Less(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn greater(self, other: Expression) -> Self {
        Self::Greater(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn and(self, other: Expression) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Expression) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }
}

impl std::ops::Not for Expression {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Variable(variable) => write!(f, "{variable}"),
            Expression::Constant(constant) => write!(f, "{constant}"),
            Expression::Integer(value) => write!(f, "{value}"),
            Expression::Add(lhs, rhs) => write!(f, "({lhs} + {rhs})"),
            Expression::Equal(lhs, rhs) => write!(f, "({lhs} = {rhs})"),
            Expression::NotEqual(lhs, rhs) => write!(f, "({lhs} != {rhs})"),
            Expression::Less(lhs, rhs) => write!(f, "({lhs} < {rhs})"),
            Expression::Greater(lhs, rhs) => write!(f, "({lhs} > {rhs})"),
            Expression::And(lhs, rhs) => write!(f, "({lhs} && {rhs})"),
            Expression::Or(lhs, rhs) => write!(f, "({lhs} || {rhs})"),
            Expression::Not(inner) => write!(f, "!{inner}"),
            Expression::Bound(variable) => write!(f, "bound({variable})"),
        }
    }
}

/// The result of evaluating an [Expression].
///
/// Values of different kinds order as booleans < integers < terms.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExpressionValue {
    Boolean(bool),
    Integer(i64),
    Term(Constant),
}

impl ExpressionValue {
    /// Reads a constant, recognising integer literals of the form
    /// `"42"^^<http://www.w3.org/2001/XMLSchema#integer>`.
    pub fn from_constant(constant: &Constant) -> Self {
        parse_integer_literal(constant.as_str())
            .map_or_else(|| Self::Term(constant.clone()), Self::Integer)
    }

    /// The effective boolean value.
    ///
    /// Integers are true if non-zero and terms are true if non-empty.
    pub fn effective_boolean_value(&self) -> bool {
        match self {
            ExpressionValue::Boolean(value) => *value,
            ExpressionValue::Integer(value) => *value != 0,
            ExpressionValue::Term(term) => !term.as_str().is_empty(),
        }
    }

    /// Converts the value into a constant that can be bound to a variable.
    pub fn into_constant(self) -> Constant {
        match self {
            ExpressionValue::Boolean(value) => Constant::new(value.to_string()),
            ExpressionValue::Integer(value) => integer_literal(value),
            ExpressionValue::Term(term) => term,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ExpressionValue::Boolean(_) => "boolean",
            ExpressionValue::Integer(_) => "integer",
            ExpressionValue::Term(_) => "term",
        }
    }
}

/// Formats `value` as an integer literal.
pub fn integer_literal(value: i64) -> Constant {
    Constant::new(format!("\"{value}\"^^<{XSD_INTEGER}>"))
}

fn parse_integer_literal(value: &str) -> Option<i64> {
    let lexical = value
        .strip_prefix('"')?
        .strip_suffix('>')?
        .strip_suffix(XSD_INTEGER)?
        .strip_suffix("\"^^<")?;
    lexical.parse().ok()
}

/// A shared [ExpressionEvaluator].
pub type ExpressionEvaluatorRef = Arc<dyn ExpressionEvaluator>;

/// Evaluates expressions against bindings.
///
/// The engine calls this hook for every expression it evaluates, so an application can plug in
/// its own function library.
pub trait ExpressionEvaluator: Debug + Send + Sync {
    /// Evaluates `expression` against `binding`.
    fn evaluate(
        &self,
        expression: &Expression,
        binding: &Binding,
    ) -> Result<ExpressionValue, ExpressionError>;
}

/// The built-in expression language.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExpressionEvaluator;

impl ExpressionEvaluator for DefaultExpressionEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        binding: &Binding,
    ) -> Result<ExpressionValue, ExpressionError> {
        match expression {
            Expression::Variable(variable) => binding
                .get(variable)
                .map(ExpressionValue::from_constant)
                .ok_or_else(|| ExpressionError::UnboundVariable(variable.clone())),
            Expression::Constant(constant) => Ok(ExpressionValue::from_constant(constant)),
            Expression::Integer(value) => Ok(ExpressionValue::Integer(*value)),
            Expression::Add(lhs, rhs) => {
                let lhs = self.evaluate(lhs, binding)?;
                let rhs = self.evaluate(rhs, binding)?;
                match (lhs, rhs) {
                    (ExpressionValue::Integer(lhs), ExpressionValue::Integer(rhs)) => lhs
                        .checked_add(rhs)
                        .map(ExpressionValue::Integer)
                        .ok_or(ExpressionError::Overflow("+")),
                    (lhs, rhs) => Err(ExpressionError::type_mismatch(
                        "+",
                        format!("cannot add {} and {}", lhs.kind(), rhs.kind()),
                    )),
                }
            }
            Expression::Equal(lhs, rhs) => {
                let equal = self.evaluate(lhs, binding)? == self.evaluate(rhs, binding)?;
                Ok(ExpressionValue::Boolean(equal))
            }
            Expression::NotEqual(lhs, rhs) => {
                let equal = self.evaluate(lhs, binding)? == self.evaluate(rhs, binding)?;
                Ok(ExpressionValue::Boolean(!equal))
            }
            Expression::Less(lhs, rhs) => self.compare("<", lhs, rhs, binding, |o| o.is_lt()),
            Expression::Greater(lhs, rhs) => self.compare(">", lhs, rhs, binding, |o| o.is_gt()),
            Expression::And(lhs, rhs) => {
                if !self.evaluate(lhs, binding)?.effective_boolean_value() {
                    return Ok(ExpressionValue::Boolean(false));
                }
                let rhs = self.evaluate(rhs, binding)?.effective_boolean_value();
                Ok(ExpressionValue::Boolean(rhs))
            }
            Expression::Or(lhs, rhs) => {
                if self.evaluate(lhs, binding)?.effective_boolean_value() {
                    return Ok(ExpressionValue::Boolean(true));
                }
                let rhs = self.evaluate(rhs, binding)?.effective_boolean_value();
                Ok(ExpressionValue::Boolean(rhs))
            }
            Expression::Not(inner) => {
                let value = self.evaluate(inner, binding)?.effective_boolean_value();
                Ok(ExpressionValue::Boolean(!value))
            }
            Expression::Bound(variable) => Ok(ExpressionValue::Boolean(binding.contains(variable))),
        }
    }
}

impl DefaultExpressionEvaluator {
    fn compare(
        &self,
        operation: &'static str,
        lhs: &Expression,
        rhs: &Expression,
        binding: &Binding,
        test: impl FnOnce(std::cmp::Ordering) -> bool,
    ) -> Result<ExpressionValue, ExpressionError> {
        let lhs = self.evaluate(lhs, binding)?;
        let rhs = self.evaluate(rhs, binding)?;
        if lhs.kind() != rhs.kind() {
            return Err(ExpressionError::type_mismatch(
                operation,
                format!("cannot compare {} and {}", lhs.kind(), rhs.kind()),
            ));
        }
        Ok(ExpressionValue::Boolean(test(lhs.cmp(&rhs))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> Binding {
        [
            (Variable::new_unchecked("age"), integer_literal(41)),
            (Variable::new_unchecked("name"), Constant::new("\"Alice\"")),
        ]
        .into_iter()
        .collect()
    }

    fn eval(expression: &Expression) -> Result<ExpressionValue, ExpressionError> {
        DefaultExpressionEvaluator.evaluate(expression, &binding())
    }

    #[test]
    fn integer_literals_are_recognised() {
        let value = eval(&Expression::variable("age").add(Expression::Integer(1))).unwrap();
        assert_eq!(value, ExpressionValue::Integer(42));
        assert_eq!(
            value.into_constant().as_str(),
            "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn comparisons() {
        let older = Expression::variable("age").greater(Expression::Integer(40));
        assert_eq!(eval(&older), Ok(ExpressionValue::Boolean(true)));

        let named = Expression::variable("name").equal(Expression::constant("\"Alice\""));
        assert_eq!(eval(&named), Ok(ExpressionValue::Boolean(true)));

        let mixed = Expression::variable("name").less(Expression::Integer(3));
        assert!(matches!(
            eval(&mixed),
            Err(ExpressionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn unbound_variable_is_an_error() {
        assert_eq!(
            eval(&Expression::variable("missing")),
            Err(ExpressionError::UnboundVariable(Variable::new_unchecked(
                "missing"
            )))
        );
        assert_eq!(
            eval(&!Expression::Bound(Variable::new_unchecked("missing"))),
            Ok(ExpressionValue::Boolean(true))
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        let missing = Expression::variable("missing");
        let or = Expression::Integer(1).or(missing.clone());
        assert_eq!(eval(&or), Ok(ExpressionValue::Boolean(true)));

        let and = Expression::Integer(0).and(missing);
        assert_eq!(eval(&and), Ok(ExpressionValue::Boolean(false)));
    }

    #[test]
    fn overflow_is_an_error() {
        let sum = Expression::Integer(i64::MAX).add(Expression::Integer(1));
        assert_eq!(eval(&sum), Err(ExpressionError::Overflow("+")));
    }
}
