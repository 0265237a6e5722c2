//! Result encoder - outcome to wire payload
//!
//! Converts a success value, domain error, structured error or exception into
//! the canonical envelope and materializes it as a `StringHandoff`.
//!
//! Encoding never fails outward: a success value that cannot be serialized
//! (including NaN or infinite floats, which JSON has no form for), is not a
//! JSON object, or exceeds the payload ceiling is downgraded to a failure
//! envelope describing why.

use crate::alloc::HandoffAllocator;
use crate::envelope::{failure_bytes, success_bytes};
use crate::finite::check_finite;
use crate::handoff::StringHandoff;
use crate::outcome::{Exception, Outcome, StructuredError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tether_config::{BridgeConfig, DEFAULT_MAX_PAYLOAD_BYTES};
use tracing::{error, warn};

/// Encodes outcomes into handoffs owned by one allocator
#[derive(Clone)]
pub struct ResultEncoder {
    allocator: Arc<dyn HandoffAllocator>,
    max_payload_bytes: usize,
}

impl ResultEncoder {
    /// Encoder with the default payload ceiling
    pub fn new(allocator: Arc<dyn HandoffAllocator>) -> Self {
        Self {
            allocator,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Encoder configured from `[host]` settings
    pub fn from_config(config: &BridgeConfig, allocator: Arc<dyn HandoffAllocator>) -> Self {
        Self::new(allocator).with_max_payload_bytes(config.max_payload_bytes())
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Allocator that owns every handoff this encoder produces
    pub fn allocator(&self) -> &Arc<dyn HandoffAllocator> {
        &self.allocator
    }

    /// Success envelope around a JSON object
    pub fn encode_success(&self, value: &Map<String, Value>) -> StringHandoff {
        self.encode_serializable(value)
    }

    /// Success envelope around any `Serialize` value that maps to a JSON object
    pub fn encode_serializable<T: Serialize + ?Sized>(&self, value: &T) -> StringHandoff {
        if let Err(e) = check_finite(value) {
            warn!(error = %e, "result serialization failed");
            return self.encode_error(&format!("failed to serialize result: {}", e));
        }

        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "result serialization failed");
                return self.encode_error(&format!("failed to serialize result: {}", e));
            }
        };

        if !data.is_object() {
            return self.encode_error(&format!(
                "failed to serialize result: expected a JSON object, got {}",
                json_kind(&data)
            ));
        }

        let bytes = match success_bytes(&data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "result serialization failed");
                return self.encode_error(&format!("failed to serialize result: {}", e));
            }
        };

        if bytes.len() > self.max_payload_bytes {
            warn!(
                size = bytes.len(),
                limit = self.max_payload_bytes,
                "result payload over limit"
            );
            return self.encode_error(&format!(
                "result payload too large: {} bytes exceeds limit of {}",
                bytes.len(),
                self.max_payload_bytes
            ));
        }

        self.materialize(&bytes)
    }

    /// Failure envelope around a plain message
    pub fn encode_error(&self, message: &str) -> StringHandoff {
        self.materialize(&failure_bytes(message))
    }

    /// Failure envelope from an error object
    pub fn encode_structured_error(&self, error: &StructuredError) -> StringHandoff {
        self.encode_error(&error.message())
    }

    /// Failure envelope from an exception
    pub fn encode_exception(&self, exception: &Exception) -> StringHandoff {
        self.encode_error(&exception.message())
    }

    /// Dispatch on the outcome kind
    pub fn encode_outcome(&self, outcome: &Outcome) -> StringHandoff {
        match outcome {
            Outcome::Success(data) => self.encode_success(data),
            Outcome::DomainError(message) => self.encode_error(message),
            Outcome::Structured(error) => self.encode_structured_error(error),
            Outcome::Exception(exception) => self.encode_exception(exception),
        }
    }

    /// Copy bytes into an owned buffer, degrading on allocation failure
    fn materialize(&self, bytes: &[u8]) -> StringHandoff {
        match StringHandoff::create_in(self.allocator.as_ref(), bytes) {
            Ok(handoff) => handoff,
            Err(e) => {
                error!(error = %e, size = bytes.len(), "could not allocate result payload");
                let fallback = failure_bytes(&format!(
                    "failed to allocate {} bytes for result",
                    bytes.len()
                ));
                // An empty handoff decodes as malformed on the receiving side,
                // which still resolves the call.
                StringHandoff::create_in(self.allocator.as_ref(), &fallback)
                    .unwrap_or_else(|_| StringHandoff::empty())
            }
        }
    }
}

impl fmt::Debug for ResultEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultEncoder")
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

/// Name of a JSON value's kind, for messages that must not echo the value
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
