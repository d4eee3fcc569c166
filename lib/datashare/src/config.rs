use crate::error::ConfigError;
use datashare_engine::{EvaluationConfig, DEFAULT_JOIN_BUFFER_CAPACITY};
use datashare_federation::protocol::PROTOCOL_VERSION;
use datashare_federation::{Protocol, DEFAULT_REPLY_BATCH_SIZE};
use datashare_model::vocab::{Namespaces, DEFAULT_NAMESPACE_BASE};
use serde::Deserialize;

/// Holds the configuration of a [DataShare](crate::DataShare) node.
///
/// The account the node acts as is the identity of its messaging endpoint.
///
/// The configuration can be loaded from JSON; missing fields take their default value:
///
/// ```
/// use datashare::DataShareConfig;
///
/// let config = DataShareConfig::from_json(r#"{ "reply-batch-size": 50 }"#)?;
/// assert_eq!(config.reply_batch_size, 50);
/// assert_eq!(config.join_buffer_capacity, 10_000);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DataShareConfig {
    /// The base IRI of all DataShare namespaces. Also identifies the protocol on the wire.
    pub namespace_base: String,
    /// The number of left-hand bindings a join buffers before scanning its right-hand side.
    pub join_buffer_capacity: usize,
    /// The number of bindings per `solution-data` message sent by the responder.
    pub reply_batch_size: usize,
    /// The version of the remote select protocol.
    pub protocol_version: u64,
}

impl DataShareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_namespace_base(mut self, namespace_base: impl Into<String>) -> Self {
        self.namespace_base = namespace_base.into();
        self
    }

    #[must_use]
    pub fn with_join_buffer_capacity(mut self, capacity: usize) -> Self {
        self.join_buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_reply_batch_size(mut self, batch_size: usize) -> Self {
        self.reply_batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: u64) -> Self {
        self.protocol_version = version;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.namespace_base.ends_with('/') && !self.namespace_base.ends_with('#') {
            return Err(ConfigError::invalid(
                "namespace-base",
                "must end with '/' or '#'",
            ));
        }
        if self.join_buffer_capacity == 0 {
            return Err(ConfigError::invalid(
                "join-buffer-capacity",
                "must be positive",
            ));
        }
        if self.reply_batch_size == 0 {
            return Err(ConfigError::invalid("reply-batch-size", "must be positive"));
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(self.namespace_base.as_str())
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::new(self.namespace_base.as_str(), self.protocol_version)
    }

    pub fn evaluation_config(&self) -> EvaluationConfig {
        EvaluationConfig::new().with_join_buffer_capacity(self.join_buffer_capacity)
    }
}

impl Default for DataShareConfig {
    fn default() -> Self {
        Self {
            namespace_base: DEFAULT_NAMESPACE_BASE.to_owned(),
            join_buffer_capacity: DEFAULT_JOIN_BUFFER_CAPACITY,
            reply_batch_size: DEFAULT_REPLY_BATCH_SIZE,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
