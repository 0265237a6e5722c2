//! Unmanaged-side client
//!
//! Issues commands through a `CommandTransport`, suspends on a oneshot
//! receiver and resumes when the delivery for its context token arrives. The
//! delivered buffer is copied out and released before the waiting call is
//! woken, so the payload's lifetime never escapes the sink.

use crate::callback::{Delivery, DeliverySink};
use crate::context::CallContext;
use crate::envelope::{CommandRequest, Envelope};
use crate::error::ProtocolViolation;
use crate::handoff::StringHandoff;
use crate::host::Host;
use crate::pending::PendingCalls;
use crate::release::{ReceivedPayload, Releaser};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Why a call did not produce a success value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The managed side delivered a failure envelope
    #[error("{0}")]
    Remote(String),

    /// The transport refused to schedule the call
    #[error("call was not accepted by the host")]
    Rejected,

    /// The completion was dropped without a delivery
    #[error("host went away before delivering a result")]
    Disconnected,

    /// The delivered payload is not a valid envelope
    #[error("could not decode result: {0}")]
    Decode(String),

    /// The request could not be serialized
    #[error("could not encode request: {0}")]
    Encode(String),
}

/// Path from the client to a managed-side host
pub trait CommandTransport: Send + Sync {
    /// Schedule `input`; returns `false` if no delivery will follow
    fn run_command(&self, context: CallContext, input: &[u8], sink: Arc<dyn DeliverySink>) -> bool;

    /// Release entry point for handoffs this transport delivers
    fn releaser(&self) -> Releaser;
}

impl CommandTransport for Host {
    fn run_command(&self, context: CallContext, input: &[u8], sink: Arc<dyn DeliverySink>) -> bool {
        Host::run_command(self, context, input, sink)
    }

    fn releaser(&self) -> Releaser {
        Host::releaser(self)
    }
}

/// Receives deliveries and completes pending calls
struct ClientSink {
    pending: Arc<PendingCalls>,
    releaser: Releaser,
}

impl DeliverySink for ClientSink {
    fn deliver(&self, context: CallContext, handoff: StringHandoff) -> Delivery {
        let Some(completion) = self.pending.take(context) else {
            let violation = ProtocolViolation::UnknownContext(context);
            warn!(%violation, "rejecting delivery");
            return Delivery::Rejected(handoff);
        };
        if completion.is_closed() {
            debug!(%context, "caller stopped waiting, rejecting delivery");
            return Delivery::Rejected(handoff);
        }

        let payload = ReceivedPayload::new(handoff, self.releaser.clone());
        let text = payload
            .to_utf8()
            .map_err(|e| CallError::Decode(e.to_string()));
        if let Err(e) = payload.release() {
            warn!(%context, error = %e, "failed to release delivered payload");
        }

        if completion.send(text).is_err() {
            debug!(%context, "caller stopped waiting after delivery");
        }
        Delivery::Accepted
    }
}

/// Issues commands and awaits their results
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn CommandTransport>,
    pending: Arc<PendingCalls>,
    sink: Arc<ClientSink>,
}

impl Client {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let sink = Arc::new(ClientSink {
            pending: Arc::clone(&pending),
            releaser: transport.releaser(),
        });
        Self {
            transport,
            pending,
            sink,
        }
    }

    /// Run `command` and decode the envelope
    pub async fn call(&self, command: &str, params: Map<String, Value>) -> Result<Value, CallError> {
        let input = encode_request(command, params)?;
        let text = self.call_raw(&input).await?;
        decode_result(&text)
    }

    /// Run a pre-encoded command and return the raw payload text
    pub async fn call_raw(&self, input: &[u8]) -> Result<String, CallError> {
        let receiver = self.issue(input)?;
        receiver.await.map_err(|_| CallError::Disconnected)?
    }

    /// Blocking variant of `call` for threads outside any async runtime
    ///
    /// Panics if called from within a tokio runtime.
    pub fn call_blocking(&self, command: &str, params: Map<String, Value>) -> Result<Value, CallError> {
        let input = encode_request(command, params)?;
        let receiver = self.issue(&input)?;
        let text = receiver.blocking_recv().map_err(|_| CallError::Disconnected)??;
        decode_result(&text)
    }

    /// Calls issued but not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn issue(&self, input: &[u8]) -> Result<oneshot::Receiver<Result<String, CallError>>, CallError> {
        let (context, receiver) = self.pending.register();
        debug!(%context, size = input.len(), "call issued");

        let sink: Arc<dyn DeliverySink> = self.sink.clone();
        if !self.transport.run_command(context, input, sink) {
            // A delivery racing this removal is rejected by the sink
            self.pending.take(context);
            return Err(CallError::Rejected);
        }
        Ok(receiver)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn encode_request(command: &str, params: Map<String, Value>) -> Result<Vec<u8>, CallError> {
    serde_json::to_vec(&CommandRequest::new(command, params))
        .map_err(|e| CallError::Encode(e.to_string()))
}

fn decode_result(text: &str) -> Result<Value, CallError> {
    Envelope::decode(text.as_bytes())
        .map_err(|e| CallError::Decode(e.to_string()))?
        .into_result()
        .map_err(CallError::Remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TrackingAllocator;
    use crate::outcome::Outcome;
    use serde_json::json;

    fn echo(params: &Map<String, Value>) -> Outcome {
        Outcome::success(params.clone())
    }

    /// Transport that refuses every call
    struct Refusing;

    impl CommandTransport for Refusing {
        fn run_command(&self, _: CallContext, _: &[u8], _: Arc<dyn DeliverySink>) -> bool {
            false
        }

        fn releaser(&self) -> Releaser {
            Releaser::Allocator(Arc::new(crate::alloc::SystemAllocator))
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let alloc = Arc::new(TrackingAllocator::new());
        let host = Arc::new(
            Host::builder()
                .allocator(alloc.clone())
                .handler("echo", echo)
                .build()
                .unwrap(),
        );
        let client = Client::new(host.clone());

        let mut params = Map::new();
        params.insert("id".to_string(), json!(42));
        let value = client.call("echo", params).await.unwrap();

        assert_eq!(value, json!({"id": 42}));
        assert_eq!(client.pending(), 0);
        assert!(alloc.is_balanced());
    }

    #[tokio::test]
    async fn test_remote_failure() {
        let host = Arc::new(Host::builder().build().unwrap());
        let client = Client::new(host);

        let err = client.call("missing", Map::new()).await.unwrap_err();

        assert_eq!(err, CallError::Remote("unknown command: missing".to_string()));
    }

    #[tokio::test]
    async fn test_refused_call_is_rejected() {
        let client = Client::new(Arc::new(Refusing));

        assert_eq!(client.call("any", Map::new()).await, Err(CallError::Rejected));
        assert_eq!(client.pending(), 0);
    }

    #[test]
    fn test_delivery_for_unknown_context_is_rejected() {
        let sink = ClientSink {
            pending: Arc::new(PendingCalls::new()),
            releaser: Releaser::Allocator(Arc::new(crate::alloc::SystemAllocator)),
        };
        let handoff = StringHandoff::create(b"{}").unwrap();

        match sink.deliver(CallContext::from_raw(12), handoff) {
            Delivery::Rejected(handoff) => crate::release::release(handoff).unwrap(),
            Delivery::Accepted => panic!("unknown context must be rejected"),
        }
    }

    #[test]
    fn test_call_blocking() {
        let host = Arc::new(Host::builder().handler("echo", echo).build().unwrap());
        let client = Client::new(host);

        let value = client.call_blocking("echo", Map::new()).unwrap();

        assert_eq!(value, json!({}));
    }
}
