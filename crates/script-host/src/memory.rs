//! Memory accounting for the sandbox runtime
//!
//! QuickJS reports a refused allocation as a catchable `InternalError`, which
//! a script could swallow and carry on. The allocator here enforces the limit
//! itself and latches the tracker, so exhaustion is seen by the runner no
//! matter what the script does with the error.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rquickjs::allocator::{Allocator, RustAllocator};

/// Memory usage tracker for the runtime
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    current: Arc<AtomicUsize>,
    exhausted: Arc<AtomicBool>,
    limit: usize,
}

impl MemoryTracker {
    /// A `limit` of 0 means unlimited
    pub fn new(limit: usize) -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            exhausted: Arc::new(AtomicBool::new(false)),
            limit,
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether an allocation was ever refused; never resets
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    fn admit(&self, extra: usize) -> bool {
        if self.limit != 0 && self.current().saturating_add(extra) > self.limit {
            self.exhaust();
            return false;
        }
        true
    }

    fn exhaust(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }

    fn grow(&self, bytes: usize) {
        self.current.fetch_add(bytes, Ordering::Relaxed);
    }

    fn shrink(&self, bytes: usize) {
        let _ = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// Rust global allocator with the sandbox limit applied
pub(crate) struct TrackingAllocator {
    tracker: MemoryTracker,
}

impl TrackingAllocator {
    pub(crate) fn new(tracker: MemoryTracker) -> Self {
        Self { tracker }
    }

    fn record(&self, block: *mut u8) -> *mut u8 {
        if block.is_null() {
            self.tracker.exhaust();
        } else {
            // SAFETY: `block` was just returned by `RustAllocator`
            self.tracker.grow(unsafe { RustAllocator::usable_size(block) });
        }
        block
    }
}

// SAFETY: every block comes from `RustAllocator`, which upholds the contract;
// this type only refuses requests and counts bytes.
unsafe impl Allocator for TrackingAllocator {
    fn alloc(&mut self, size: usize) -> *mut u8 {
        if !self.tracker.admit(size) {
            return ptr::null_mut();
        }
        let block = RustAllocator.alloc(size);
        self.record(block)
    }

    fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        if total == 0 {
            return ptr::null_mut();
        }
        if !self.tracker.admit(total) {
            return ptr::null_mut();
        }
        let block = RustAllocator.calloc(count, size);
        self.record(block)
    }

    unsafe fn dealloc(&mut self, block: *mut u8) {
        self.tracker.shrink(RustAllocator::usable_size(block));
        RustAllocator.dealloc(block);
    }

    unsafe fn realloc(&mut self, block: *mut u8, new_size: usize) -> *mut u8 {
        if block.is_null() {
            return self.alloc(new_size);
        }
        if new_size == 0 {
            self.dealloc(block);
            return ptr::null_mut();
        }

        let old_size = RustAllocator::usable_size(block);
        if new_size > old_size && !self.tracker.admit(new_size - old_size) {
            return ptr::null_mut();
        }
        let moved = RustAllocator.realloc(block, new_size);
        if moved.is_null() {
            // The old block is still live and still counted
            self.tracker.exhaust();
            return moved;
        }
        self.tracker.shrink(old_size);
        self.tracker.grow(RustAllocator::usable_size(moved));
        moved
    }

    unsafe fn usable_size(block: *mut u8) -> usize {
        RustAllocator::usable_size(block)
    }
}
