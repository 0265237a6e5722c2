//! Pending-call registry on the unmanaged side
//!
//! Each issued call gets a fresh context token and a oneshot sender parked
//! under it. Delivery takes the sender out, so a second delivery for the same
//! token finds nothing and is rejected.

use crate::client::CallError;
use crate::context::CallContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Completion half of a pending call: the raw payload text or a call error
pub type Completion = oneshot::Sender<Result<String, CallError>>;

/// Outstanding calls keyed by context token
#[derive(Debug)]
pub struct PendingCalls {
    next_id: AtomicUsize,
    calls: Mutex<HashMap<CallContext, Completion>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            // Zero is reserved so a null context never matches a call
            next_id: AtomicUsize::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Park a new call and return its token plus the receiver to await
    pub fn register(&self) -> (CallContext, oneshot::Receiver<Result<String, CallError>>) {
        let (tx, rx) = oneshot::channel();
        let context = CallContext::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(context, tx);
        (context, rx)
    }

    /// Remove and return the completion for `context`, if still pending
    pub fn take(&self, context: CallContext) -> Option<Completion> {
        self.lock().remove(&context)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CallContext, Completion>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_distinct_nonzero_tokens() {
        let pending = PendingCalls::new();
        let (a, _rx_a) = pending.register();
        let (b, _rx_b) = pending.register();

        assert_ne!(a, b);
        assert_ne!(a.into_raw(), 0);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_take_is_single_shot() {
        let pending = PendingCalls::new();
        let (ctx, mut rx) = pending.register();

        let tx = pending.take(ctx).unwrap();
        assert!(pending.take(ctx).is_none());
        assert!(pending.is_empty());

        tx.send(Ok("done".to_string())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Ok("done".to_string()));
    }

    #[test]
    fn test_take_unknown_context() {
        let pending = PendingCalls::new();
        assert!(pending.take(CallContext::from_raw(999)).is_none());
    }
}
