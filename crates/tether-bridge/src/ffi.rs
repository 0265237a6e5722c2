//! C ABI entry points
//!
//! The embedding application builds a `Host`, installs it once with
//! `install_global_host`, and foreign callers drive it through
//! `tether_run_command` / `tether_release_string`. Panics never cross the
//! boundary.

use crate::alloc::SystemAllocator;
use crate::callback::{DeliverFn, Delivery, DeliverySink, FnSink};
use crate::context::CallContext;
use crate::encoder::ResultEncoder;
use crate::handoff::StringHandoff;
use crate::host::Host;
use crate::release::release;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{error, warn};

/// Failure delivered when no host has been installed
pub const HOST_NOT_INSTALLED: &str = "bridge host is not installed";

static GLOBAL_HOST: OnceLock<Host> = OnceLock::new();

/// Addresses of `HOST_NOT_INSTALLED` payloads the foreign side still owns
///
/// They come from `SystemAllocator` and go back to it even if a host is
/// installed before they are released.
static UNHOSTED_PAYLOADS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());

fn unhosted_payloads() -> MutexGuard<'static, BTreeSet<usize>> {
    UNHOSTED_PAYLOADS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Install the process-wide host; hands it back if one is already set
pub fn install_global_host(host: Host) -> Result<(), Host> {
    GLOBAL_HOST.set(host)
}

pub fn global_host() -> Option<&'static Host> {
    GLOBAL_HOST.get()
}

/// Run a JSON command on the global host
///
/// Returns `true` when exactly one call to `deliver` for `context` will
/// happen (possibly before this function returns). Returns `false` when
/// `deliver` is null or the call could not be scheduled; nothing is
/// delivered then.
///
/// # Safety
///
/// `input` must point to `input_len` readable bytes, or be null with
/// `input_len` 0. `deliver` must be callable from any thread and follow the
/// `DeliverFn` ownership rule. Accepted handoffs must be returned through
/// `tether_release_string`.
#[no_mangle]
pub unsafe extern "C" fn tether_run_command(
    context: CallContext,
    input: *const u8,
    input_len: usize,
    deliver: Option<DeliverFn>,
) -> bool {
    let Some(deliver) = deliver else {
        warn!(%context, "tether_run_command called without a deliver callback");
        return false;
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: caller contract
        let sink: Arc<dyn DeliverySink> = Arc::new(unsafe { FnSink::new(deliver) });
        let input = if input.is_null() || input_len == 0 {
            &[][..]
        } else {
            // SAFETY: caller contract
            unsafe { std::slice::from_raw_parts(input, input_len) }
        };

        match GLOBAL_HOST.get() {
            Some(host) => host.run_command(context, input, sink),
            None => {
                warn!(%context, "no global host installed");
                deliver_unhosted(context, sink.as_ref());
                true
            }
        }
    }));

    result.unwrap_or_else(|_| {
        error!(%context, "panic inside tether_run_command");
        false
    })
}

/// Deliver the not-installed failure, recording it until it is released
fn deliver_unhosted(context: CallContext, sink: &dyn DeliverySink) {
    let handoff = ResultEncoder::new(Arc::new(SystemAllocator)).encode_error(HOST_NOT_INSTALLED);
    let address = handoff.as_ptr() as usize;
    unhosted_payloads().insert(address);

    if let Delivery::Rejected(handoff) = sink.deliver(context, handoff) {
        // Unrecord before freeing so the address cannot be reused while listed
        unhosted_payloads().remove(&address);
        if let Err(e) = release(handoff) {
            warn!(%context, error = %e, "failed to release rejected payload");
        }
    }
}

/// Release a handoff delivered by `tether_run_command`
///
/// Payloads are returned to the allocator that produced them: the global
/// host's, or the system allocator for `HOST_NOT_INSTALLED` failures
/// delivered before the host was installed. Releasing the empty handoff is a
/// no-op.
///
/// # Safety
///
/// `handoff` must have been delivered by this library and not released
/// before.
#[no_mangle]
pub unsafe extern "C" fn tether_release_string(handoff: StringHandoff) {
    let result = catch_unwind(AssertUnwindSafe(move || {
        let unhosted = unhosted_payloads().remove(&(handoff.as_ptr() as usize));
        match GLOBAL_HOST.get() {
            Some(host) if !unhosted => host.release(handoff),
            _ => release(handoff),
        }
    }));

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "tether_release_string failed"),
        Err(_) => error!("panic inside tether_release_string"),
    }
}
