use thiserror::Error;

/// An error raised while parsing the textual form of a [Term](crate::Term).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TermParseError {
    /// The input was empty.
    #[error("A term must not be empty")]
    Empty,
    /// A `?` marker without a name.
    #[error("The variable '{0}' has no name")]
    EmptyVariableName(String),
    /// A variable name containing characters that are not allowed.
    #[error("The variable name '{0}' contains invalid characters")]
    InvalidVariableName(String),
}
