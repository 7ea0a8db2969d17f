use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tracing::trace;

use crate::error::{MessageError, Result};

/// Random draws before giving up on finding a free id.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 64;

/// Hands out random message ids unique among in-flight outbound messages.
///
/// One allocator per channel direction; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    in_flight: Arc<Mutex<HashSet<u32>>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> Result<AllocatedId> {
        self.allocate_with(&mut rand::thread_rng())
    }

    pub fn allocate_with<R: Rng>(&self, rng: &mut R) -> Result<AllocatedId> {
        let mut in_flight = self.lock();
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let id: u32 = rng.gen();
            if in_flight.insert(id) {
                return Ok(AllocatedId {
                    id,
                    allocator: self.clone(),
                });
            }
            trace!(id, attempt, "message id collision");
        }
        Err(MessageError::IdSpaceExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    pub fn release(&self, id: u32) {
        self.lock().remove(&id);
    }

    pub fn is_in_flight(&self, id: u32) -> bool {
        self.lock().contains(&id)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An id reserved for one outbound message; released on drop.
#[derive(Debug)]
pub struct AllocatedId {
    id: u32,
    allocator: IdAllocator,
}

impl AllocatedId {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for AllocatedId {
    fn drop(&mut self) {
        self.allocator.release(self.id);
    }
}
