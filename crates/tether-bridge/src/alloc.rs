//! Allocators backing handoff buffers
//!
//! Every handoff buffer is produced and freed by the same allocator family.
//! `SystemAllocator` is the production family (the global Rust allocator);
//! `TrackingAllocator` wraps it with bookkeeping so tests can prove that
//! every buffer is released exactly once.

use crate::error::{BridgeError, BridgeResult, ProtocolViolation};
use std::alloc::Layout;
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Allocator family for handoff buffers
///
/// `capacity` is the full allocation size, including any terminator the
/// caller reserves.
pub trait HandoffAllocator: Send + Sync {
    /// Allocate `capacity` bytes with byte alignment
    fn allocate(&self, capacity: usize) -> BridgeResult<NonNull<u8>>;

    /// Free a buffer previously returned by `allocate`
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `capacity`. Implementations that track ownership may reject misuse
    /// with a `ProtocolViolation`; others have undefined behavior.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, capacity: usize) -> BridgeResult<()>;
}

/// The global Rust allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

fn byte_layout(capacity: usize) -> BridgeResult<Layout> {
    Layout::from_size_align(capacity, 1)
        .map_err(|_| BridgeError::AllocationFailed { size: capacity })
}

impl HandoffAllocator for SystemAllocator {
    fn allocate(&self, capacity: usize) -> BridgeResult<NonNull<u8>> {
        if capacity == 0 {
            return Err(BridgeError::AllocationFailed { size: 0 });
        }
        let layout = byte_layout(capacity)?;
        // SAFETY: layout has non-zero size
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(BridgeError::AllocationFailed { size: capacity })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, capacity: usize) -> BridgeResult<()> {
        let layout = byte_layout(capacity)?;
        // SAFETY: caller guarantees ptr/capacity pair came from allocate
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }
}

/// Snapshot of a `TrackingAllocator`'s counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    /// Successful allocations
    pub allocations: usize,
    /// Successful releases
    pub releases: usize,
    /// Buffers currently outstanding
    pub live: usize,
    /// Bytes currently outstanding
    pub live_bytes: usize,
}

#[derive(Default)]
struct Ledger {
    /// address -> capacity
    outstanding: HashMap<usize, usize>,
    /// addresses freed and not handed out again
    retired: HashSet<usize>,
    violations: Vec<ProtocolViolation>,
}

/// Allocator that records every buffer it hands out
///
/// Releasing an address twice, or one it never produced, is recorded as a
/// `ProtocolViolation` and returned as an error; the memory is not touched.
#[derive(Default)]
pub struct TrackingAllocator {
    inner: SystemAllocator,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    ledger: Mutex<Ledger>,
}

impl TrackingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters
    pub fn stats(&self) -> AllocStats {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        AllocStats {
            allocations: self.allocations.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
            live: ledger.outstanding.len(),
            live_bytes: ledger.outstanding.values().sum(),
        }
    }

    /// Every violation observed so far, in order
    pub fn violations(&self) -> Vec<ProtocolViolation> {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .violations
            .clone()
    }

    /// True when every allocation has been released exactly once
    pub fn is_balanced(&self) -> bool {
        let stats = self.stats();
        stats.live == 0 && stats.allocations == stats.releases && self.violations().is_empty()
    }

    fn record(&self, ledger: &mut Ledger, violation: ProtocolViolation) -> BridgeError {
        error!(%violation, "handoff protocol violation");
        ledger.violations.push(violation.clone());
        BridgeError::Protocol(violation)
    }
}

impl HandoffAllocator for TrackingAllocator {
    fn allocate(&self, capacity: usize) -> BridgeResult<NonNull<u8>> {
        let ptr = self.inner.allocate(capacity)?;
        let address = ptr.as_ptr() as usize;
        {
            let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            ledger.retired.remove(&address);
            ledger.outstanding.insert(address, capacity);
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, capacity: usize) -> BridgeResult<()> {
        let address = ptr.as_ptr() as usize;
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);

        match ledger.outstanding.get(&address).copied() {
            Some(allocated) if allocated == capacity => {
                ledger.outstanding.remove(&address);
                ledger.retired.insert(address);
            }
            Some(allocated) => {
                return Err(self.record(
                    &mut ledger,
                    ProtocolViolation::SizeMismatch {
                        address,
                        allocated,
                        released: capacity,
                    },
                ));
            }
            None if ledger.retired.contains(&address) => {
                return Err(self.record(&mut ledger, ProtocolViolation::DoubleRelease { address }));
            }
            None => {
                return Err(self.record(&mut ledger, ProtocolViolation::ForeignRelease { address }));
            }
        }
        drop(ledger);

        // SAFETY: the ledger confirmed this pair came from inner.allocate
        unsafe { self.inner.deallocate(ptr, capacity)? };
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocator_round_trip() {
        let alloc = SystemAllocator;
        let ptr = alloc.allocate(16).unwrap();
        unsafe { alloc.deallocate(ptr, 16).unwrap() };
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            SystemAllocator.allocate(0),
            Err(BridgeError::AllocationFailed { size: 0 })
        );
    }

    #[test]
    fn test_tracking_counts() {
        let alloc = TrackingAllocator::new();
        let a = alloc.allocate(8).unwrap();
        let b = alloc.allocate(4).unwrap();

        let stats = alloc.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.live, 2);
        assert_eq!(stats.live_bytes, 12);
        assert!(!alloc.is_balanced());

        unsafe {
            alloc.deallocate(a, 8).unwrap();
            alloc.deallocate(b, 4).unwrap();
        }
        assert!(alloc.is_balanced());
    }

    #[test]
    fn test_double_release_detected() {
        let alloc = TrackingAllocator::new();
        let ptr = alloc.allocate(8).unwrap();
        let address = ptr.as_ptr() as usize;

        unsafe { alloc.deallocate(ptr, 8).unwrap() };
        let second = unsafe { alloc.deallocate(ptr, 8) };

        assert_eq!(
            second,
            Err(BridgeError::Protocol(ProtocolViolation::DoubleRelease {
                address
            }))
        );
        assert_eq!(alloc.stats().releases, 1);
        assert!(!alloc.is_balanced());
    }

    #[test]
    fn test_foreign_release_detected() {
        let tracker = TrackingAllocator::new();
        let foreign = SystemAllocator.allocate(8).unwrap();

        let result = unsafe { tracker.deallocate(foreign, 8) };
        assert!(matches!(
            result,
            Err(BridgeError::Protocol(ProtocolViolation::ForeignRelease { .. }))
        ));

        unsafe { SystemAllocator.deallocate(foreign, 8).unwrap() };
    }

    #[test]
    fn test_size_mismatch_detected() {
        let alloc = TrackingAllocator::new();
        let ptr = alloc.allocate(8).unwrap();

        let wrong = unsafe { alloc.deallocate(ptr, 9) };
        assert!(matches!(
            wrong,
            Err(BridgeError::Protocol(ProtocolViolation::SizeMismatch {
                allocated: 8,
                released: 9,
                ..
            }))
        ));

        // Buffer is still outstanding and can be released correctly
        unsafe { alloc.deallocate(ptr, 8).unwrap() };
        assert_eq!(alloc.stats().live, 0);
    }
}
