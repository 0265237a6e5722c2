//! JSON and base64 collaborators
//!
//! Application logic uses these to build success values before they reach the
//! encoder. Their failures are ordinary `BridgeError`s; when they happen
//! inside a handler the host reports them as exceptions.

use crate::encoder::json_kind;
use crate::error::{BridgeError, BridgeResult};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};

/// URL-safe alphabet; canonical padding is optional, anything else is rejected
const URL_SAFE_OPTIONAL_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Parse text into a JSON object
pub fn parse_json(text: &str) -> BridgeResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(BridgeError::Json(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Serialize a JSON object to text
pub fn serialize_json(map: &Map<String, Value>) -> BridgeResult<String> {
    Ok(serde_json::to_string(map)?)
}

/// Decode URL-safe base64, with or without `=` padding
pub fn decode_base64_url(text: &str) -> BridgeResult<Vec<u8>> {
    Ok(URL_SAFE_OPTIONAL_PAD.decode(text)?)
}
