//! Chatflow Common - Shared configuration, logging, and error types.
//!
//! This crate provides:
//! - Configuration types and loading (`config`)
//! - The error taxonomy shared by the bot crates (`error`)
//! - Logging setup and tracing span helpers (`logging`)
//! - Small utilities (`util`)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{
    BookingConfig, Config, ObservabilityConfig, OutboundConfig, QueueConfig, ServerConfig,
    SessionConfig,
};
pub use error::{Error, Result, ResultExt};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::util::normalize_contact_id;
}
