//! The wire format of remote `select` requests and their replies.
//!
//! Every message is a JSON object:
//!
//! ```json
//! {
//!   "version": 1,
//!   "namespace": "http://datashare.local/rdf/",
//!   "op": "select",
//!   "from": "http://datashare.local/rdf/user/alice",
//!   "target": "http://datashare.local/rdf/user/bob",
//!   "request-id": 7,
//!   "patterns": [{ "subject": "?s", "predicate": "?p", "object": "?o" }]
//! }
//! ```
//!
//! A `select` is answered by zero or more `solution-data` messages, each carrying a batch of
//! bindings in `data`, followed by exactly one `solution-end`. A `solution-end` carries an `error`
//! string if the evaluation failed. Replies repeat `from`, `target` and `request-id` of the request.

use crate::error::ProtocolError;
use datashare_model::{Binding, TriplePattern};
use serde::{Deserialize, Serialize};

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// The operation of a [ProtocolMessage].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Select,
    SolutionData,
    SolutionEnd,
}

/// A message of the remote select protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolMessage {
    pub version: u64,
    pub namespace: String,
    pub op: Operation,
    /// The URI of the requester.
    pub from: String,
    /// The URI of the store the request is addressed to.
    pub target: String,
    pub request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<TriplePattern>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Binding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProtocolMessage {
    /// Creates the `solution-data` reply to this request.
    pub fn reply_data(&self, data: Vec<Binding>) -> Self {
        Self {
            op: Operation::SolutionData,
            data: Some(data),
            ..self.reply_header()
        }
    }

    /// Creates the `solution-end` reply to this request.
    pub fn reply_end(&self, error: Option<String>) -> Self {
        Self {
            op: Operation::SolutionEnd,
            error,
            ..self.reply_header()
        }
    }

    fn reply_header(&self) -> Self {
        Self {
            version: self.version,
            namespace: self.namespace.clone(),
            op: self.op,
            from: self.from.clone(),
            target: self.target.clone(),
            request_id: self.request_id,
            patterns: None,
            data: None,
            error: None,
        }
    }

    /// Serializes the message into a messaging item.
    pub fn encode(&self) -> Result<serde_json::Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The version and namespace a node speaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protocol {
    version: u64,
    namespace: String,
}

impl Protocol {
    pub fn new(namespace: impl Into<String>, version: u64) -> Self {
        Self {
            version,
            namespace: namespace.into(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates a `select` request.
    pub fn select(
        &self,
        from: impl Into<String>,
        target: impl Into<String>,
        request_id: u64,
        patterns: Vec<TriplePattern>,
    ) -> ProtocolMessage {
        ProtocolMessage {
            version: self.version,
            namespace: self.namespace.clone(),
            op: Operation::Select,
            from: from.into(),
            target: target.into(),
            request_id,
            patterns: Some(patterns),
            data: None,
            error: None,
        }
    }

    /// Parses a messaging item.
    ///
    /// Fails if the item is not a message of this protocol version and namespace, or if the
    /// payload its operation requires is missing.
    pub fn decode(&self, item: &serde_json::Value) -> Result<ProtocolMessage, ProtocolError> {
        let message = ProtocolMessage::deserialize(item)?;
        if message.version != self.version {
            return Err(ProtocolError::VersionMismatch {
                expected: self.version,
                found: message.version,
            });
        }
        if message.namespace != self.namespace {
            return Err(ProtocolError::ForeignNamespace(message.namespace));
        }
        match message.op {
            Operation::Select if message.patterns.is_none() => {
                Err(ProtocolError::MissingPayload("patterns"))
            }
            Operation::SolutionData if message.data.is_none() => {
                Err(ProtocolError::MissingPayload("data"))
            }
            _ => Ok(message),
        }
    }
}
