//! Tether - cross-runtime result/error marshalling bridge
//!
//! Lets a managed runtime (exceptions, structured errors, reference-counted
//! values) hand results to an unmanaged runtime that must free whatever it
//! did not allocate itself.
//!
//! A call flows like this:
//! 1. the client registers a pending call and passes its `CallContext` token
//!    with the command to the host;
//! 2. the host runs the handler and captures its `Outcome`, including panics;
//! 3. the `ResultEncoder` turns the outcome into the wire envelope inside a
//!    `StringHandoff` owned by the host's allocator;
//! 4. the `CallbackBridge` delivers `(context, handoff)` exactly once;
//! 5. the client copies the payload, releases the handoff through the
//!    host's allocator, and resumes the waiting call.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::{json, Map, Value};
//! use tether_bridge::{Client, Host, Outcome};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Host::builder()
//!     .handler("ping", |_: &Map<String, Value>| -> Outcome {
//!         let mut data = Map::new();
//!         data.insert("pong".to_string(), json!(true));
//!         Outcome::success(data)
//!     })
//!     .build()?;
//! let client = Client::new(Arc::new(host));
//! let value = client.call("ping", Map::new()).await?;
//! assert_eq!(value, json!({"pong": true}));
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod callback;
pub mod client;
pub mod codec;
pub mod context;
pub mod encoder;
pub mod envelope;
pub mod error;
pub mod ffi;
mod finite;
pub mod handoff;
pub mod host;
pub mod logging;
pub mod outcome;
pub mod pending;
pub mod release;

pub use alloc::{AllocStats, HandoffAllocator, SystemAllocator, TrackingAllocator};
pub use callback::{CallbackBridge, DeliverFn, Delivery, DeliverySink, FnSink, Responder};
pub use client::{CallError, Client, CommandTransport};
pub use context::CallContext;
pub use encoder::ResultEncoder;
pub use envelope::{CommandRequest, Envelope};
pub use error::{BridgeError, BridgeResult, ProtocolViolation};
pub use handoff::StringHandoff;
pub use host::{Handler, Host, HostBuilder};
pub use outcome::{Exception, Outcome, StructuredError};
pub use release::{release, release_in, ReceivedPayload, ReleaseFn, Releaser};
pub use tether_config::BridgeConfig;
