//! Reusable integer allocator
//!
//! All session resource handles (layers, buffers, streams) are small
//! integers drawn from a pool. Released integers are reused before any new,
//! higher integer is minted, keeping handle namespaces dense.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Pool of reusable small integers
///
/// Allocation and release are O(1) and safe to call from any task or thread;
/// multiple user tasks of one session allocate from the same pools.
#[derive(Debug, Default)]
pub struct IndexPool {
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Next never-yet-issued integer
    next: i32,
    /// Released integers awaiting reuse, oldest first
    free: VecDeque<i32>,
    /// Currently outstanding count
    active: usize,
}

impl IndexPool {
    /// Create a new empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an integer: a previously released one if any exist,
    /// otherwise the next never-yet-issued value
    pub fn allocate(&self) -> i32 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.active += 1;
        match inner.free.pop_front() {
            Some(index) => index,
            None => {
                let index = inner.next;
                inner.next += 1;
                index
            }
        }
    }

    /// Return an integer to the pool
    ///
    /// Releasing an integer that is not currently outstanding corrupts the
    /// pool's uniqueness guarantee; that is the caller's responsibility.
    pub fn release(&self, index: i32) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.active = inner.active.saturating_sub(1);
        inner.free.push_back(index);
    }

    /// Number of currently outstanding integers
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }
}
