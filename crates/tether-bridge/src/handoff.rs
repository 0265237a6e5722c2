//! StringHandoff - an owned byte buffer crossing the bridge
//!
//! The managed side copies an encoded result into a buffer it allocates, then
//! hands `(value, size)` to the unmanaged side. From that point the receiver
//! owns the buffer until it calls the release entry point.
//!
//! # Memory Safety
//!
//! - `size` is authoritative; the trailing NUL is a logging convenience only
//! - The type is neither `Clone` nor `Copy`, and has no `Drop`: the only ways
//!   to end its life are delivery and explicit release
//! - An empty handoff (null pointer, size 0) owns nothing

use crate::alloc::{HandoffAllocator, SystemAllocator};
use crate::error::{BridgeError, BridgeResult};
use std::ptr;

/// Owned byte buffer plus explicit length
///
/// Layout is `#[repr(C)]` so the value can be passed by value across the C
/// ABI as `{ uint8_t *value; size_t size; }`.
#[repr(C)]
#[derive(Debug)]
#[must_use = "a handoff must be delivered or released, otherwise it leaks"]
pub struct StringHandoff {
    value: *mut u8,
    size: usize,
}

// SAFETY: a handoff is exclusively owned by whichever side holds it and the
// buffer is never aliased across threads.
unsafe impl Send for StringHandoff {}

impl StringHandoff {
    /// Copy `bytes` into a buffer from the system allocator
    pub fn create(bytes: &[u8]) -> BridgeResult<Self> {
        Self::create_in(&SystemAllocator, bytes)
    }

    /// Copy `bytes` into a buffer from `allocator`
    ///
    /// The buffer is sized `bytes.len() + 1`; the extra byte is a NUL
    /// terminator that is not counted in `size`.
    pub fn create_in(allocator: &dyn HandoffAllocator, bytes: &[u8]) -> BridgeResult<Self> {
        let size = bytes.len();
        let capacity = size
            .checked_add(1)
            .ok_or(BridgeError::AllocationFailed { size })?;
        let buffer = allocator.allocate(capacity)?;

        // SAFETY: buffer has capacity = size + 1 writable bytes and does not
        // overlap `bytes`
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_ptr(), size);
            *buffer.as_ptr().add(size) = 0;
        }

        Ok(Self {
            value: buffer.as_ptr(),
            size,
        })
    }

    /// A handoff that owns nothing
    pub const fn empty() -> Self {
        Self {
            value: ptr::null_mut(),
            size: 0,
        }
    }

    /// Rebuild a handoff from its raw parts
    ///
    /// # Safety
    ///
    /// `value` must be null with `size == 0`, or point to a live buffer of at
    /// least `size + 1` bytes produced by `create_in`, whose ownership the
    /// caller holds.
    pub unsafe fn from_raw_parts(value: *mut u8, size: usize) -> Self {
        Self { value, size }
    }

    /// Give up ownership, returning the raw parts
    pub fn into_raw_parts(self) -> (*mut u8, usize) {
        (self.value, self.size)
    }

    /// Buffer address
    pub fn as_ptr(&self) -> *const u8 {
        self.value
    }

    /// Byte count (excluding the terminator)
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True for the owns-nothing handoff
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Allocation size that must be passed back to the allocator
    pub(crate) fn capacity(&self) -> usize {
        if self.value.is_null() {
            0
        } else {
            self.size + 1
        }
    }

    /// View the payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        if self.value.is_null() {
            return &[];
        }
        // SAFETY: a live handoff points at `size` initialized bytes
        unsafe { std::slice::from_raw_parts(self.value, self.size) }
    }

    /// Copy the payload out as a `String`
    pub fn to_utf8(&self) -> BridgeResult<String> {
        Ok(std::str::from_utf8(self.as_bytes())?.to_owned())
    }
}
