//! Packet id allocation.

use crate::packet::{NO_REPLY_ID, PacketId};
use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out correlation ids for one session.
///
/// Ids increase monotonically and wrap back to 1 on overflow, never yielding
/// [`NO_REPLY_ID`]. Uniqueness only has to hold across calls that are still
/// pending, since an id is retired the moment its call completes.
#[derive(Debug)]
pub struct PacketIdAllocator {
    next: AtomicU32,
}

impl PacketIdAllocator {
    /// Create an allocator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an allocator whose first id is `start` (or 1 if `start` is the sentinel).
    #[must_use]
    pub const fn starting_at(start: PacketId) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> PacketId {
        loop {
            // fetch_add wraps on overflow
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != NO_REPLY_ID {
                return id;
            }
        }
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
