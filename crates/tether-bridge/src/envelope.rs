//! Wire envelope
//!
//! Every payload carried by a handoff is exactly one of:
//!
//! ```text
//! {"success": true,  "data": <value>}
//! {"success": false, "error": "<message>"}
//! ```

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Last-resort failure payload, used only if serializing a string message fails
const FALLBACK_FAILURE: &[u8] = br#"{"success":false,"error":"internal encoding failure"}"#;

/// Decoded wire payload
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success(Value),
    Failure(String),
}

/// Command issued by the unmanaged side
///
/// ```text
/// {"command": "<name>", "params": {...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

#[derive(Serialize)]
struct SuccessWire<'a> {
    success: bool,
    data: &'a Value,
}

#[derive(Serialize)]
struct FailureWire<'a> {
    success: bool,
    error: &'a str,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Envelope {
    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> BridgeResult<Vec<u8>> {
        match self {
            Envelope::Success(data) => success_bytes(data),
            Envelope::Failure(message) => Ok(failure_bytes(message)),
        }
    }

    /// Parse wire bytes
    pub fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;
        // Derived Deserialize would also take the positional array form
        if !value.is_object() {
            return Err(BridgeError::MalformedEnvelope(
                "envelope must be a JSON object".to_string(),
            ));
        }
        let raw: RawEnvelope = serde_json::from_value(value)
            .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;

        match (raw.success, raw.data, raw.error) {
            (true, data, None) => Ok(Envelope::Success(data.unwrap_or(Value::Null))),
            (false, None, Some(Value::String(message))) => Ok(Envelope::Failure(message)),
            (false, None, Some(other)) => Err(BridgeError::MalformedEnvelope(format!(
                "error must be a string, got {}",
                other
            ))),
            (false, None, None) => Err(BridgeError::MalformedEnvelope(
                "failure envelope without an error message".to_string(),
            )),
            (true, _, Some(_)) => Err(BridgeError::MalformedEnvelope(
                "success envelope carries an error".to_string(),
            )),
            (false, Some(_), _) => Err(BridgeError::MalformedEnvelope(
                "failure envelope carries data".to_string(),
            )),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    /// Convert into a `Result`, error side being the message
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Envelope::Success(data) => Ok(data),
            Envelope::Failure(message) => Err(message),
        }
    }
}

/// Success envelope around an already-converted value
pub(crate) fn success_bytes(data: &Value) -> BridgeResult<Vec<u8>> {
    Ok(serde_json::to_vec(&SuccessWire {
        success: true,
        data,
    })?)
}

/// Failure envelope; cannot fail
pub(crate) fn failure_bytes(message: &str) -> Vec<u8> {
    serde_json::to_vec(&FailureWire {
        success: false,
        error: message,
    })
    .unwrap_or_else(|_| FALLBACK_FAILURE.to_vec())
}
