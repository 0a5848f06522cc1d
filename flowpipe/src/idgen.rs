//! Handles for wait/notify coordination between pipeline stages

use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque integer identity of a notification source (one side of a link)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: i64,
}

impl Handle {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }
}

pub trait HandleType {
    type Id;
}

impl HandleType for Handle {
    type Id = i64;
}

/// Type that can be either a Handle id or an arbitrary signal value
pub type IntCanBeHandle = <Handle as HandleType>::Id;

/// Thread-safe ID generator
///
/// One generator is shared by all links of a pipeline so that their
/// handles never collide inside the common notification queue.
#[derive(Debug)]
pub struct IdGen {
    next_id: AtomicI64,
}

impl IdGen {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }

    /// Get the next unique ID
    pub fn get_next(&self) -> IntCanBeHandle {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a fresh handle
    pub fn next_handle(&self) -> Handle {
        Handle::new(self.get_next())
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
