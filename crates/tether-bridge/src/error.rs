//! Error types for the bridge
//!
//! `BridgeError` covers failures inside one side of the bridge (collaborators,
//! allocation, decoding). `ProtocolViolation` covers misuse of the ownership
//! contract itself; those are bugs at the call site, surfaced by the tracking
//! allocator and the pending-call registry rather than handled at runtime.

use crate::context::CallContext;
use thiserror::Error;

/// Bridge error type
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// JSON collaborator failed (parse or serialize)
    #[error("Invalid JSON: {0}")]
    Json(String),

    /// Base64 collaborator failed
    #[error("Invalid base64: {0}")]
    Base64(String),

    /// Payload bytes are not UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Allocator could not provide a buffer
    #[error("Allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    /// Payload is JSON but not one of the two envelope shapes
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Tokio runtime for the host could not be started
    #[error("Failed to start host runtime: {0}")]
    Runtime(String),

    /// Log filter directive could not be parsed
    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    /// Ownership or delivery contract broken by the caller
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

/// Programming errors against the handoff contract
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("buffer at {address:#x} released twice")]
    DoubleRelease { address: usize },

    #[error("buffer at {address:#x} was not allocated by this allocator")]
    ForeignRelease { address: usize },

    #[error("buffer at {address:#x} allocated with {allocated} bytes but released with {released}")]
    SizeMismatch {
        address: usize,
        allocated: usize,
        released: usize,
    },

    #[error("no pending call for {0}")]
    UnknownContext(CallContext),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Json(e.to_string())
    }
}

impl From<base64::DecodeError> for BridgeError {
    fn from(e: base64::DecodeError) -> Self {
        BridgeError::Base64(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for BridgeError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        BridgeError::InvalidUtf8(e.to_string())
    }
}

impl From<std::str::Utf8Error> for BridgeError {
    fn from(e: std::str::Utf8Error) -> Self {
        BridgeError::InvalidUtf8(e.to_string())
    }
}
