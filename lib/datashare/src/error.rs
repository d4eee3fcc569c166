/// An error in a [DataShareConfig](crate::DataShareConfig).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration is not valid JSON or has unknown fields.
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::InvalidValue { field, message }
    }
}
