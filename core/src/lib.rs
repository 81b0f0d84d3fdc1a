//! Ember Core - Foundational Types
//!
//! Error taxonomy and environment inputs shared by the ember
//! registry, builder, and CLI crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::EnvInputs;
pub use error::{EmberError, Result};

/// Ember version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
