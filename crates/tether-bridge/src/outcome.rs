//! Outcomes produced by managed-side domain logic
//!
//! A handler finishes in exactly one of four ways. The encoder turns each of
//! them into a wire envelope; the three failure kinds collapse to the same
//! `{"success": false, "error": ...}` shape and differ only in how the
//! message is extracted.

use crate::error::BridgeError;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

/// Result of one managed-side call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success value: a JSON object
    Success(Map<String, Value>),
    /// Application-raised failure message
    DomainError(String),
    /// Failure surfaced through an error object
    Structured(StructuredError),
    /// Failure surfaced through a thrown exception (or panic)
    Exception(Exception),
}

impl Outcome {
    pub fn success(data: Map<String, Value>) -> Self {
        Outcome::Success(data)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outcome::DomainError(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Lift a handler's `Result`, converting the error side
    pub fn from_result<E: Into<Outcome>>(result: Result<Map<String, Value>, E>) -> Self {
        match result {
            Ok(data) => Outcome::Success(data),
            Err(e) => e.into(),
        }
    }
}

/// Collaborator failures inside a handler surface as exceptions
impl From<BridgeError> for Outcome {
    fn from(error: BridgeError) -> Self {
        Outcome::Exception(Exception::new("BridgeError", error.to_string()))
    }
}

impl From<StructuredError> for Outcome {
    fn from(error: StructuredError) -> Self {
        Outcome::Structured(error)
    }
}

impl From<Exception> for Outcome {
    fn from(exception: Exception) -> Self {
        Outcome::Exception(exception)
    }
}

/// Error object with domain, code and human-readable description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    pub domain: String,
    pub code: i64,
    pub description: String,
}

impl StructuredError {
    pub fn new(domain: impl Into<String>, code: i64, description: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            description: description.into(),
        }
    }

    /// Message carried on the wire
    ///
    /// The description when present, otherwise "<domain> error <code>".
    pub fn message(&self) -> String {
        if self.description.is_empty() {
            format!("{} error {}", self.domain, self.code)
        } else {
            self.description.clone()
        }
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for StructuredError {}

/// Thrown exception: name, description, optional reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub name: String,
    pub description: String,
    pub reason: Option<String>,
}

impl Exception {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Capture a panic payload from `catch_unwind`
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let description = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new("panic", description)
    }

    /// Message carried on the wire
    ///
    /// The description, followed by ": <reason>" when a non-empty reason is
    /// available.
    pub fn message(&self) -> String {
        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => format!("{}: {}", self.description, reason),
            _ => self.description.clone(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for Exception {}
