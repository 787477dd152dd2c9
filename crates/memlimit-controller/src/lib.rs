//! memlimit controller
//!
//! This crate provides the bounded memory accountant used by messaging
//! clients to apply backpressure on buffered data:
//!
//! - Reservation accounting via [`MemoryLimitController`]
//! - Interruptible waits via [`CancellationToken`]
//! - RAII accounting via [`Reservation`]
//! - Snapshots via [`LimiterStats`]
//!
//! # Admission Rules
//!
//! The ceiling is soft. A caller is admitted whenever usage is *at or below*
//! the ceiling before its reservation is added, so usage can overshoot the
//! ceiling by one reservation:
//!
//! 1. **`reserve`**: parks while usage is over the ceiling
//! 2. **`try_reserve`**: returns `false` while usage is over the ceiling
//! 3. **`force_reserve`**: always admits, for bytes already committed
//!
//! ```ignore
//! use memlimit_controller::MemoryLimitController;
//!
//! let controller = MemoryLimitController::with_trigger(64 * 1024 * 1024, 95.0, || {
//!     tracing::warn!("memory usage above 95%");
//! })?;
//!
//! controller.reserve(message.len() as i64)?;
//! // ... deliver the message ...
//! controller.release(message.len() as i64)?;
//! ```
//!
//! ## Trigger
//!
//! The trigger callback is edge-triggered. It fires once when usage reaches
//! the threshold and not again until a release takes usage strictly below
//! the threshold. It runs on the thread whose reservation crossed the
//! threshold, after the internal lock is released, so it may call back into
//! the controller.

pub mod cancel;
pub mod controller;
pub mod reservation;
pub mod stats;

// Re-export main types
pub use cancel::CancellationToken;
pub use controller::{MemoryLimitController, TriggerCallback};
pub use memlimit_core::{LimitError, LimitResult, LimiterConfig};
pub use reservation::Reservation;
pub use stats::LimiterStats;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::controller::MemoryLimitController;
    pub use crate::reservation::Reservation;
    pub use memlimit_core::prelude::*;
}
