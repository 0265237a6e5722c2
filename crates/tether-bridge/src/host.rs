//! Managed-side host
//!
//! Owns the allocator, the result encoder, the registered command handlers and
//! a tokio runtime. `run_command` returns immediately; the handler runs on the
//! runtime's blocking pool and its outcome is delivered through a `Responder`,
//! so every accepted call produces exactly one delivery whatever the handler
//! does (returns, errors, panics).

use crate::alloc::{HandoffAllocator, SystemAllocator};
use crate::callback::{CallbackBridge, DeliverySink};
use crate::context::CallContext;
use crate::encoder::ResultEncoder;
use crate::envelope::CommandRequest;
use crate::error::{BridgeError, BridgeResult};
use crate::handoff::StringHandoff;
use crate::outcome::{Exception, Outcome};
use crate::release::{release_in, Releaser};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tether_config::BridgeConfig;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

/// Domain logic behind one command name
pub trait Handler: Send + Sync {
    fn handle(&self, params: &Map<String, Value>) -> Outcome;
}

impl<F> Handler for F
where
    F: Fn(&Map<String, Value>) -> Outcome + Send + Sync,
{
    fn handle(&self, params: &Map<String, Value>) -> Outcome {
        self(params)
    }
}

type HandlerMap = HashMap<String, Arc<dyn Handler>>;

/// Configures and starts a `Host`
pub struct HostBuilder {
    config: BridgeConfig,
    allocator: Arc<dyn HandoffAllocator>,
    handlers: HandlerMap,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            allocator: Arc::new(SystemAllocator),
            handlers: HashMap::new(),
        }
    }

    /// Take worker count and payload ceiling from `config`
    pub fn from_config(config: BridgeConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Allocator family for every handoff the host produces
    pub fn allocator(mut self, allocator: Arc<dyn HandoffAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Register `handler` under `command`, replacing any previous one
    pub fn handler(mut self, command: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(command.into(), Arc::new(handler));
        self
    }

    /// Start the runtime
    ///
    /// Handlers only ever run on the blocking pool, so the scheduler is a
    /// single current-thread core and `workers` caps the pool.
    pub fn build(self) -> BridgeResult<Host> {
        let workers = self.config.workers();
        let runtime = Builder::new_current_thread()
            .max_blocking_threads(workers)
            .thread_name("tether-host")
            .build()
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;

        info!(
            workers,
            commands = self.handlers.len(),
            max_payload_bytes = self.config.max_payload_bytes(),
            "host started"
        );

        Ok(Host {
            runtime: Some(runtime),
            encoder: ResultEncoder::from_config(&self.config, self.allocator.clone()),
            allocator: self.allocator,
            handlers: Arc::new(self.handlers),
        })
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Managed side of the bridge
pub struct Host {
    // Option so Drop can hand the runtime to shutdown_background
    runtime: Option<Runtime>,
    encoder: ResultEncoder,
    allocator: Arc<dyn HandoffAllocator>,
    handlers: Arc<HandlerMap>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Dispatch the JSON command in `input` and deliver its result to `sink`
    ///
    /// Returns `true` once the call is scheduled; exactly one delivery for
    /// `context` follows. Returns `false` only when the host is shutting
    /// down, in which case nothing is delivered.
    pub fn run_command(
        &self,
        context: CallContext,
        input: &[u8],
        sink: Arc<dyn DeliverySink>,
    ) -> bool {
        let Some(runtime) = self.runtime.as_ref() else {
            warn!(%context, "host is shut down, call not scheduled");
            return false;
        };

        let responder = CallbackBridge::new(sink, self.allocator.clone())
            .responder(context, self.encoder.clone());
        let handlers = Arc::clone(&self.handlers);
        let input = input.to_vec();

        debug!(%context, size = input.len(), "call scheduled");
        runtime.spawn_blocking(move || {
            let outcome = dispatch(&handlers, context, &input);
            responder.respond(outcome);
        });
        true
    }

    /// Run the command on the calling thread and return the encoded result
    ///
    /// The caller owns the returned handoff and must release it through
    /// `release`.
    pub fn run_command_inline(&self, input: &[u8]) -> StringHandoff {
        let outcome = dispatch(&self.handlers, CallContext::from_raw(0), input);
        self.encoder.encode_outcome(&outcome)
    }

    /// Release a handoff this host produced
    pub fn release(&self, handoff: StringHandoff) -> BridgeResult<()> {
        release_in(self.allocator.as_ref(), handoff)
    }

    /// In-process release entry point for clients
    pub fn releaser(&self) -> Releaser {
        Releaser::Allocator(self.allocator.clone())
    }

    pub fn allocator(&self) -> &Arc<dyn HandoffAllocator> {
        &self.allocator
    }

    pub fn encoder(&self) -> &ResultEncoder {
        &self.encoder
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Unstarted calls are dropped with their responders, which
            // deliver the dropped-call failure
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.commands().collect();
        commands.sort_unstable();
        f.debug_struct("Host")
            .field("commands", &commands)
            .field("encoder", &self.encoder)
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

/// Parse, look up and run one command, turning every failure into an outcome
fn dispatch(handlers: &HandlerMap, context: CallContext, input: &[u8]) -> Outcome {
    let request: CommandRequest = match serde_json::from_slice(input) {
        Ok(request) => request,
        Err(e) => {
            warn!(%context, error = %e, "invalid command input");
            return Exception::new("InvalidInput", format!("invalid command input: {}", e)).into();
        }
    };

    let Some(handler) = handlers.get(&request.command) else {
        warn!(%context, command = %request.command, "unknown command");
        return Outcome::error(format!("unknown command: {}", request.command));
    };

    debug!(%context, command = %request.command, "dispatching");
    match catch_unwind(AssertUnwindSafe(|| handler.handle(&request.params))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let exception = Exception::from_panic(payload.as_ref());
            warn!(%context, command = %request.command, panic = %exception, "handler panicked");
            exception.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Delivery;
    use crate::envelope::Envelope;
    use serde_json::json;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    fn echo(params: &Map<String, Value>) -> Outcome {
        Outcome::success(params.clone())
    }

    fn host() -> Host {
        Host::builder().handler("echo", echo).build().unwrap()
    }

    fn inline(host: &Host, input: &[u8]) -> Envelope {
        let handoff = host.run_command_inline(input);
        let envelope = Envelope::decode(handoff.as_bytes()).unwrap();
        host.release(handoff).unwrap();
        envelope
    }

    #[test]
    fn test_inline_echo() {
        let host = host();
        let envelope = inline(&host, br#"{"command":"echo","params":{"id":42}}"#);
        assert_eq!(envelope, Envelope::Success(json!({"id": 42})));
    }

    #[test]
    fn test_unknown_command() {
        let host = host();
        let envelope = inline(&host, br#"{"command":"nope"}"#);
        assert_eq!(envelope, Envelope::Failure("unknown command: nope".to_string()));
    }

    #[test]
    fn test_invalid_input_is_failure() {
        let host = host();
        match inline(&host, b"not json") {
            Envelope::Failure(message) => {
                assert!(message.starts_with("invalid command input:"), "{}", message)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panicking_handler_is_exception() {
        let host = Host::builder()
            .handler("boom", |_: &Map<String, Value>| -> Outcome { panic!("kaboom") })
            .build()
            .unwrap();

        let envelope = inline(&host, br#"{"command":"boom"}"#);

        assert_eq!(envelope, Envelope::Failure("kaboom".to_string()));
    }

    #[test]
    fn test_workers_from_config() {
        let config = BridgeConfig {
            host: Some(tether_config::HostConfig {
                workers: Some(1),
                max_payload_bytes: Some(1024),
            }),
            logging: None,
        };
        let host = HostBuilder::from_config(config).handler("echo", echo).build().unwrap();
        assert_eq!(host.commands().collect::<Vec<_>>(), vec!["echo"]);
        assert_eq!(host.encoder().max_payload_bytes(), 1024);
    }

    /// Forwards each delivery's envelope to a channel
    struct ChannelSink(Mutex<mpsc::Sender<(CallContext, Envelope)>>);

    impl DeliverySink for ChannelSink {
        fn deliver(&self, context: CallContext, handoff: StringHandoff) -> Delivery {
            let envelope = Envelope::decode(handoff.as_bytes()).unwrap();
            crate::release::release(handoff).unwrap();
            self.0.lock().unwrap().send((context, envelope)).unwrap();
            Delivery::Accepted
        }
    }

    #[test]
    fn test_single_worker_runs_every_call() {
        let config = BridgeConfig {
            host: Some(tether_config::HostConfig {
                workers: Some(1),
                max_payload_bytes: None,
            }),
            logging: None,
        };
        let host = HostBuilder::from_config(config).handler("echo", echo).build().unwrap();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));

        for i in 1..=8 {
            let input = format!(r#"{{"command":"echo","params":{{"n":{}}}}}"#, i);
            assert!(host.run_command(CallContext::from_raw(i), input.as_bytes(), sink.clone()));
        }

        let mut seen: Vec<_> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_by_key(|(context, _)| context.into_raw());
        for (i, (context, envelope)) in seen.into_iter().enumerate() {
            assert_eq!(context, CallContext::from_raw(i + 1));
            assert_eq!(envelope, Envelope::Success(json!({"n": i + 1})));
        }
    }
}
