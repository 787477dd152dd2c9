//! # memlimit - Memory Limit Controller
//!
//! memlimit is a thread-safe, bounded accountant for reserved bytes. A
//! messaging client uses it to apply backpressure: producers reserve before
//! buffering outgoing data, and consumers account for data already read off
//! the wire until it is acknowledged.
//!
//! ## Features
//!
//! - **Soft ceiling**: callers are admitted while usage is at or below it
//! - **Blocking, non-blocking and forced admission**
//! - **Edge-triggered threshold callback** with automatic re-arming
//! - **Cancellable waits** and RAII reservations
//!
//! ## Quick Start
//!
//! ```ignore
//! use memlimit::prelude::*;
//!
//! let controller = MemLimit::builder()
//!     .with_memory_limit(64 * 1024 * 1024)  // 64MB
//!     .with_trigger(95.0, || tracing::warn!("memory nearly exhausted"))
//!     .build()?;
//!
//! // Producer side: park until there is room
//! let reservation = controller.reserve_guarded(payload.len() as i64)?;
//!
//! // Consumer side: the bytes are already here, account for them anyway
//! controller.force_reserve(message.len() as i64)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Messaging client              │
//! ├─────────────────────────────────────────────┤
//! │              memlimit (facade)              │
//! ├──────────────────────┬──────────────────────┤
//! │ memlimit-controller  │    memlimit-core     │
//! │ (accounting, waits,  │  (errors, config)    │
//! │  trigger, stats)     │                      │
//! └──────────────────────┴──────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use memlimit_controller::{MemoryLimitController, TriggerCallback};
use memlimit_core::{LimitResult, LimiterConfig};

// Re-export from sub-crates
pub use memlimit_controller;
pub use memlimit_core;

/// Main entry point for memlimit.
pub struct MemLimit;

impl MemLimit {
    /// Create a new controller builder.
    pub fn builder() -> MemLimitBuilder {
        MemLimitBuilder::new()
    }

    /// Create a controller with the default configuration.
    pub fn with_defaults() -> LimitResult<MemoryLimitController> {
        MemLimitBuilder::new().build()
    }
}

/// Builder for configuring a memory limit controller.
pub struct MemLimitBuilder {
    config: LimiterConfig,
    callback: Option<TriggerCallback>,
}

impl MemLimitBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LimiterConfig::default(),
            callback: None,
        }
    }

    /// Set the ceiling in bytes. Zero disables the limit.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.config.max_memory_bytes = bytes;
        self
    }

    /// Fire `callback` when usage reaches `threshold_percent` of the ceiling.
    pub fn with_trigger<F>(mut self, threshold_percent: f64, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.trigger_threshold_percent = Some(threshold_percent);
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Attach the trigger callback, keeping the threshold from the config.
    pub fn with_trigger_callback(mut self, callback: TriggerCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file.
    pub fn with_config_file(self, path: impl AsRef<Path>) -> LimitResult<Self> {
        Ok(self.with_config(LimiterConfig::from_file(path)?))
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Build the controller.
    pub fn build(self) -> LimitResult<MemoryLimitController> {
        MemoryLimitController::from_config(&self.config, self.callback)
    }
}

impl Default for MemLimitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemLimitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemLimitBuilder")
            .field("config", &self.config)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{MemLimit, MemLimitBuilder};

    // Controller types
    pub use memlimit_controller::{
        CancellationToken, LimiterStats, MemoryLimitController, Reservation, TriggerCallback,
    };

    // Core types
    pub use memlimit_core::{LimitError, LimitResult, LimiterConfig};

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use memlimit_core::LimitError;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_memlimit_builder() {
        init_tracing();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let controller = MemLimit::builder()
            .with_memory_limit(1000)
            .with_trigger(80.0, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        assert_eq!(controller.memory_limit(), 1000);
        assert_eq!(controller.trigger_threshold(), Some(0.8));

        controller.reserve(800).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_defaults() {
        let controller = MemLimit::with_defaults().unwrap();
        assert_eq!(
            controller.memory_limit(),
            memlimit_core::DEFAULT_MAX_MEMORY_BYTES
        );
        assert!(controller.trigger_threshold().is_none());
    }

    #[test]
    fn test_builder_from_toml_config() {
        let config = LimiterConfig::from_toml_str(
            r#"
            max_memory_bytes = 100
            trigger_threshold_percent = 95.0
            "#,
        )
        .unwrap();

        let missing_callback = MemLimit::builder().with_config(config.clone()).build();
        assert!(matches!(missing_callback, Err(LimitError::InvalidConfig(_))));

        let controller = MemLimit::builder()
            .with_config(config)
            .with_trigger_callback(Arc::new(|| {}))
            .build()
            .unwrap();
        assert_eq!(controller.trigger_threshold(), Some(0.95));
    }

    #[test]
    fn test_builder_rejects_invalid_threshold() {
        let result = MemLimit::builder()
            .with_memory_limit(100)
            .with_trigger(101.0, || {})
            .build();
        assert!(matches!(result, Err(LimitError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let result = MemLimit::builder().with_config_file("/nonexistent/memlimit.toml");
        assert!(matches!(result, Err(LimitError::Io(_))));
    }

    /// A consumer accounts for every received message up front and releases
    /// on acknowledgement, while a producer on another thread is throttled.
    #[test]
    fn test_receive_and_send_paths() {
        init_tracing();

        let controller = MemLimit::builder().with_memory_limit(1024).build().unwrap();

        // Messages already read off the wire cannot be refused.
        let received: Vec<i64> = vec![512, 512, 256];
        for size in &received {
            controller.force_reserve(*size).unwrap();
        }
        assert_eq!(controller.current_usage(), 1280);

        let (tx, rx) = mpsc::channel();
        let producer = {
            let controller = controller.clone();
            thread::spawn(move || {
                let reservation = controller.reserve_guarded(128).unwrap();
                tx.send(reservation.bytes()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        // Acknowledge the first message, bringing usage back under the ceiling.
        controller.release(received[0]).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 128);
        producer.join().unwrap();

        // The producer's guard has been dropped.
        assert_eq!(controller.current_usage(), 768);
        let stats = controller.stats();
        assert_eq!(stats.forced, 3);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.peak_usage, 1280);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let controller: MemoryLimitController = MemLimit::builder().build().unwrap();
        let _token = CancellationToken::new();
        let _stats: LimiterStats = controller.stats();
        let _timeout = Duration::from_millis(1);
    }
}
