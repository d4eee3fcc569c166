use crate::TermParseError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// The marker that prefixes variables in the textual form of a [Term].
pub const VARIABLE_MARKER: char = '?';

/// A query variable.
///
/// The name does not include the leading `?` marker.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(String);

impl Variable {
    /// Creates a new [Variable], validating the name.
    pub fn new(name: impl Into<String>) -> Result<Self, TermParseError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TermParseError::EmptyVariableName(name));
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c == VARIABLE_MARKER)
        {
            return Err(TermParseError::InvalidVariableName(name));
        }
        Ok(Self(name))
    }

    /// Creates a new [Variable] without validating the name.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name of the variable without the `?` marker.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{VARIABLE_MARKER}{}", self.0)
    }
}

/// An opaque constant, either an identifier or a literal.
///
/// The engine never looks inside a constant; two constants are equal iff their strings are.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constant(String);

impl Constant {
    /// Creates a new [Constant].
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the string value of this constant.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the constant and returns its string value.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A position of a [TriplePattern](crate::TriplePattern).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Constant(Constant),
    Variable(Variable),
}

impl Term {
    /// Parses the textual form of a term. A leading `?` denotes a variable, everything else is a
    /// constant.
    ///
    /// ```
    /// use datashare_model::{Term, Variable};
    ///
    /// assert_eq!(Term::parse("?x")?, Term::Variable(Variable::new("x")?));
    /// assert!(Term::parse("ex:alice")?.is_constant());
    /// # Result::<_, Box<dyn std::error::Error>>::Ok(())
    /// ```
    pub fn parse(value: &str) -> Result<Self, TermParseError> {
        if value.is_empty() {
            return Err(TermParseError::Empty);
        }
        match value.strip_prefix(VARIABLE_MARKER) {
            Some(name) => Ok(Term::Variable(Variable::new(name)?)),
            None => Ok(Term::Constant(Constant::new(value))),
        }
    }

    /// Creates a variable term without validating the name.
    pub fn variable(name: impl Into<String>) -> Self {
        Term::Variable(Variable::new_unchecked(name))
    }

    /// Creates a constant term.
    pub fn constant(value: impl Into<String>) -> Self {
        Term::Constant(Constant::new(value))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Term::Constant(_))
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Term::Variable(variable) => Some(variable),
            Term::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Term::Constant(constant) => Some(constant),
            Term::Variable(_) => None,
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Constant(constant) => constant.fmt(f),
            Term::Variable(variable) => variable.fmt(f),
        }
    }
}

impl From<Variable> for Term {
    fn from(value: Variable) -> Self {
        Term::Variable(value)
    }
}

impl From<Constant> for Term {
    fn from(value: Constant) -> Self {
        Term::Constant(value)
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Term::parse(&value).map_err(D::Error::custom)
    }
}
