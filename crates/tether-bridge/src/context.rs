//! Opaque call context token
//!
//! The initiator of a call picks a pointer-sized value (an address, a registry
//! key, anything) and the bridge hands it back untouched with the result.

use std::ffi::c_void;
use std::fmt;

/// Opaque token correlating a delivered result with its pending call
///
/// The bridge never dereferences or interprets the value. It is
/// `#[repr(transparent)]` over `usize`, so it crosses the C ABI as a plain
/// pointer-sized integer.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallContext(usize);

impl CallContext {
    /// Wrap a raw token
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Unwrap the raw token
    pub const fn into_raw(self) -> usize {
        self.0
    }

    /// Wrap a pointer owned by the initiator
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Recover the pointer the initiator stored
    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{:x}", self.0)
    }
}
