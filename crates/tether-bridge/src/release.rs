//! Release protocol - explicit free of delivered buffers
//!
//! The receiver of a handoff frees it through the allocator family that
//! produced it, exactly once. Nothing here tracks call state: releasing twice
//! or releasing a buffer that was never handed over is a caller bug (the
//! `TrackingAllocator` reports it, the system allocator does not).

use crate::alloc::{HandoffAllocator, SystemAllocator};
use crate::error::BridgeResult;
use crate::handoff::StringHandoff;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{trace, warn};

/// C signature of the managed side's release entry point
pub type ReleaseFn = unsafe extern "C" fn(handoff: StringHandoff);

/// Release a handoff produced by the system allocator
pub fn release(handoff: StringHandoff) -> BridgeResult<()> {
    release_in(&SystemAllocator, handoff)
}

/// Release a handoff produced by `allocator`
///
/// Releasing the empty handoff is a no-op.
pub fn release_in(allocator: &dyn HandoffAllocator, handoff: StringHandoff) -> BridgeResult<()> {
    let capacity = handoff.capacity();
    let (value, size) = handoff.into_raw_parts();
    let Some(buffer) = NonNull::new(value) else {
        return Ok(());
    };

    trace!(address = value as usize, size, "releasing handoff");
    // SAFETY: a handoff owns its buffer; capacity is what create_in requested
    unsafe { allocator.deallocate(buffer, capacity) }
}

/// How the unmanaged side reaches the managed side's release entry point
#[derive(Clone)]
pub enum Releaser {
    /// In-process: call the allocator directly
    Allocator(Arc<dyn HandoffAllocator>),
    /// Across the C ABI
    Foreign(ReleaseFn),
}

impl Releaser {
    /// Release `handoff` through this entry point
    pub fn release(&self, handoff: StringHandoff) -> BridgeResult<()> {
        match self {
            Releaser::Allocator(allocator) => release_in(allocator.as_ref(), handoff),
            Releaser::Foreign(release_fn) => {
                if handoff.is_null() {
                    return Ok(());
                }
                // SAFETY: the foreign side exported this function as the
                // release entry point for buffers it produced
                unsafe { release_fn(handoff) };
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Releaser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Releaser::Allocator(_) => f.write_str("Releaser::Allocator"),
            Releaser::Foreign(func) => write!(f, "Releaser::Foreign({:p})", *func as *const ()),
        }
    }
}

/// A delivered handoff held by the unmanaged side
///
/// Dropping it calls the release entry point exactly once, so every path
/// out of the receiver (success, decode error, early return) frees the
/// buffer.
pub struct ReceivedPayload {
    handoff: Option<StringHandoff>,
    releaser: Releaser,
}

impl ReceivedPayload {
    /// Take ownership of a delivered handoff
    pub fn new(handoff: StringHandoff, releaser: Releaser) -> Self {
        Self {
            handoff: Some(handoff),
            releaser,
        }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.handoff
            .as_ref()
            .map(StringHandoff::as_bytes)
            .unwrap_or(&[])
    }

    /// Copy the payload out as UTF-8 text
    pub fn to_utf8(&self) -> BridgeResult<String> {
        Ok(std::str::from_utf8(self.as_bytes())?.to_owned())
    }

    /// Release now and report the result instead of logging it
    pub fn release(mut self) -> BridgeResult<()> {
        match self.handoff.take() {
            Some(handoff) => self.releaser.release(handoff),
            None => Ok(()),
        }
    }
}

impl Drop for ReceivedPayload {
    fn drop(&mut self) {
        if let Some(handoff) = self.handoff.take() {
            if let Err(e) = self.releaser.release(handoff) {
                warn!(error = %e, "failed to release received payload");
            }
        }
    }
}
