//! memlimit core types.
//!
//! This crate holds the pieces shared by every memlimit crate:
//!
//! - [`LimitError`] and [`LimitResult`]: the error taxonomy
//! - [`LimiterConfig`]: controller configuration, loadable from TOML
//!
//! The controller itself lives in `memlimit-controller`.

pub mod config;
pub mod error;

pub use config::{LimiterConfig, DEFAULT_MAX_MEMORY_BYTES};
pub use error::{LimitError, LimitResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::LimiterConfig;
    pub use crate::error::{LimitError, LimitResult};
}
