//! Callback bridge - delivering results back across the boundary
//!
//! One call, one delivery. The managed side gets a `Responder` per call;
//! responding consumes it, and dropping it unanswered delivers a failure, so
//! every code path reaches exactly one `deliver`.
//!
//! Ownership at the boundary: when the receiver accepts a handoff it owns the
//! buffer and must release it. When it rejects (context unknown, already
//! resolved, initiator gone) ownership stays with the caller of `deliver`,
//! which releases it before returning.

use crate::alloc::HandoffAllocator;
use crate::context::CallContext;
use crate::encoder::ResultEncoder;
use crate::handoff::StringHandoff;
use crate::outcome::Outcome;
use crate::release::release_in;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message delivered when a responder is dropped without responding
pub const DROPPED_CALL_MESSAGE: &str = "call dropped without a result";

/// C signature of the unmanaged side's deliver entry point
///
/// Returning `true` transfers ownership of `handoff` to the callee; on
/// `false` the caller still owns it.
pub type DeliverFn = unsafe extern "C" fn(context: CallContext, handoff: StringHandoff) -> bool;

/// Receiver's answer to a delivery
#[derive(Debug)]
#[must_use]
pub enum Delivery {
    /// Receiver took ownership of the handoff
    Accepted,
    /// Receiver declined; ownership returns to the caller
    Rejected(StringHandoff),
}

impl Delivery {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Delivery::Accepted)
    }
}

/// Unmanaged side of the callback
pub trait DeliverySink: Send + Sync {
    /// Resolve the call identified by `context` with `handoff`
    fn deliver(&self, context: CallContext, handoff: StringHandoff) -> Delivery;
}

/// Adapts a C deliver function to `DeliverySink`
#[derive(Clone, Copy)]
pub struct FnSink {
    deliver: DeliverFn,
}

impl FnSink {
    /// # Safety
    ///
    /// `deliver` must be safe to call from any thread and honor the
    /// ownership rule documented on `DeliverFn`.
    pub unsafe fn new(deliver: DeliverFn) -> Self {
        Self { deliver }
    }
}

impl DeliverySink for FnSink {
    fn deliver(&self, context: CallContext, handoff: StringHandoff) -> Delivery {
        let (value, size) = handoff.into_raw_parts();
        // SAFETY: FnSink::new's contract; the raw parts are rebuilt exactly
        // once on each side of the branch below
        let accepted =
            unsafe { (self.deliver)(context, StringHandoff::from_raw_parts(value, size)) };
        if accepted {
            Delivery::Accepted
        } else {
            Delivery::Rejected(unsafe { StringHandoff::from_raw_parts(value, size) })
        }
    }
}

impl fmt::Debug for FnSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnSink({:p})", self.deliver as *const ())
    }
}

/// Managed side's handle on a delivery sink
#[derive(Clone)]
pub struct CallbackBridge {
    sink: Arc<dyn DeliverySink>,
    allocator: Arc<dyn HandoffAllocator>,
}

impl CallbackBridge {
    /// `allocator` must be the family that produced the handoffs delivered
    /// through this bridge; rejected handoffs are released through it.
    pub fn new(sink: Arc<dyn DeliverySink>, allocator: Arc<dyn HandoffAllocator>) -> Self {
        Self { sink, allocator }
    }

    /// Hand `handoff` to the receiver; returns whether it was accepted
    ///
    /// A rejected handoff is released here, so the allocation never leaks.
    pub fn deliver(&self, context: CallContext, handoff: StringHandoff) -> bool {
        let size = handoff.len();
        match self.sink.deliver(context, handoff) {
            Delivery::Accepted => {
                debug!(%context, size, "delivery accepted");
                true
            }
            Delivery::Rejected(handoff) => {
                warn!(%context, size, "delivery rejected, releasing payload");
                if let Err(e) = release_in(self.allocator.as_ref(), handoff) {
                    warn!(%context, error = %e, "failed to release rejected payload");
                }
                false
            }
        }
    }

    /// Exactly-once responder for the call identified by `context`
    pub fn responder(&self, context: CallContext, encoder: ResultEncoder) -> Responder {
        Responder {
            context,
            state: Some((self.clone(), encoder)),
        }
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge").finish_non_exhaustive()
    }
}

/// Guarantees one delivery for one call
///
/// `respond` consumes the responder. If it is dropped first (a handler
/// panicked past the host's catch, a task was cancelled at shutdown), `Drop`
/// delivers `DROPPED_CALL_MESSAGE` so the initiator is never left hanging.
#[must_use = "dropping a responder delivers a failure to the caller"]
pub struct Responder {
    context: CallContext,
    state: Option<(CallbackBridge, ResultEncoder)>,
}

impl Responder {
    pub fn context(&self) -> CallContext {
        self.context
    }

    /// Encode `outcome` and deliver it
    pub fn respond(mut self, outcome: Outcome) -> bool {
        match self.state.take() {
            Some((bridge, encoder)) => bridge.deliver(self.context, encoder.encode_outcome(&outcome)),
            None => false,
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some((bridge, encoder)) = self.state.take() {
            warn!(context = %self.context, "responder dropped without a result");
            bridge.deliver(self.context, encoder.encode_error(DROPPED_CALL_MESSAGE));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("context", &self.context)
            .field("pending", &self.state.is_some())
            .finish()
    }
}
