//! RAII reservations.
//!
//! A [`Reservation`] owns bytes reserved from a [`MemoryLimitController`]
//! and returns them when dropped, so early returns and panics cannot leak
//! accounted memory.

use tracing::warn;

use memlimit_core::LimitResult;

use crate::controller::MemoryLimitController;

/// Bytes reserved from a controller, released on drop.
#[must_use = "dropping a Reservation releases its bytes immediately"]
pub struct Reservation {
    controller: MemoryLimitController,
    bytes: u64,
}

impl Reservation {
    pub(crate) fn new(controller: MemoryLimitController, bytes: u64) -> Self {
        Self { controller, bytes }
    }

    /// Number of bytes currently held.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The controller the bytes were reserved from.
    pub fn controller(&self) -> &MemoryLimitController {
        &self.controller
    }

    /// Resize the reservation to `new_bytes`.
    ///
    /// Shrinking always succeeds. Growing follows `try_reserve` admission:
    /// it returns `Ok(false)` and leaves the reservation unchanged while the
    /// controller is over its ceiling.
    pub fn try_resize(&mut self, new_bytes: u64) -> LimitResult<bool> {
        if new_bytes == self.bytes {
            return Ok(true);
        }

        if new_bytes < self.bytes {
            self.controller.release_bytes(self.bytes - new_bytes)?;
            self.bytes = new_bytes;
            return Ok(true);
        }

        match self.controller.try_grow(new_bytes - self.bytes)? {
            Some(fire_trigger) => {
                self.bytes = new_bytes;
                self.controller.fire_trigger(fire_trigger);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop tracking the bytes without releasing them.
    ///
    /// The caller becomes responsible for a matching
    /// [`release`](MemoryLimitController::release).
    pub fn forget(mut self) -> u64 {
        std::mem::take(&mut self.bytes)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes == 0 {
            return;
        }
        if let Err(e) = self.controller.release_bytes(self.bytes) {
            warn!(bytes = self.bytes, error = %e, "Failed to release reservation on drop");
        }
        self.bytes = 0;
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish()
    }
}
