//! Ignition document assembly.
//!
//! Turns a machine's declared network state and the deployment
//! environment into a validated ignition document: the agent
//! configuration file, the agent service unit, NetworkManager tuning,
//! and the optional credential / SSH / registries-mirror entries.

pub mod builder;
pub mod encode;
pub mod nmstate;
pub mod types;

pub use builder::IgnitionBuilder;
pub use nmstate::{NetworkStateRenderer, Nmstatectl};
pub use types::IgnitionConfig;
