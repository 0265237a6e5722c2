//! Shared helpers for bridge integration tests

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tether_bridge::{Client, Exception, Host, Outcome, StructuredError, TrackingAllocator};

/// Build a JSON object from a `json!` literal
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Host with the standard test commands, backed by a tracking allocator
///
/// - `echo`: succeeds with its params
/// - `lookup`: succeeds with `{"id": 42}`
/// - `fail`: domain error with `params.message`
/// - `missing_file`: structured error "file not found"
/// - `offline`: exception "network unreachable"
/// - `panic`: panics with "handler exploded"
/// - `decode`: base64url-decodes `params.data` into `{"text": ...}`
pub fn test_host() -> (Arc<TrackingAllocator>, Arc<Host>) {
    let alloc = Arc::new(TrackingAllocator::new());
    let host = Host::builder()
        .allocator(alloc.clone())
        .handler("echo", |params: &Map<String, Value>| -> Outcome {
            Outcome::success(params.clone())
        })
        .handler("lookup", |_: &Map<String, Value>| -> Outcome {
            Outcome::success(object(json!({"id": 42})))
        })
        .handler("fail", |params: &Map<String, Value>| -> Outcome {
            let message = params.get("message").and_then(Value::as_str).unwrap_or("failed");
            Outcome::error(message)
        })
        .handler("missing_file", |_: &Map<String, Value>| -> Outcome {
            StructuredError::new("NSCocoaErrorDomain", 260, "file not found").into()
        })
        .handler("offline", |_: &Map<String, Value>| -> Outcome {
            Exception::new("NSURLErrorException", "network unreachable").into()
        })
        .handler("panic", |_: &Map<String, Value>| -> Outcome {
            panic!("handler exploded")
        })
        .handler("decode", |params: &Map<String, Value>| -> Outcome {
            let data = params.get("data").and_then(Value::as_str).unwrap_or_default();
            Outcome::from_result(decode_text(data))
        })
        .build()
        .expect("host should start");
    (alloc, Arc::new(host))
}

fn decode_text(data: &str) -> tether_bridge::BridgeResult<Map<String, Value>> {
    let bytes = tether_bridge::codec::decode_base64_url(data)?;
    let text = String::from_utf8(bytes)?;
    Ok(object(json!({ "text": text })))
}

/// Host plus a client wired to it
pub fn test_client() -> (Arc<TrackingAllocator>, Arc<Host>, Client) {
    let (alloc, host) = test_host();
    let client = Client::new(host.clone());
    (alloc, host, client)
}
