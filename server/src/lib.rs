//! Ember Server - Virtual Boot-Image Registry
//!
//! Builds per-machine ignition documents and serves immutable base
//! images with the document composed in on the fly. The registry
//! exposes an HTTP-filesystem-shaped surface (`open`/`list`) for a
//! generic file server, and `serve`/`remove` for the reconciliation
//! caller.

pub mod compose;
pub mod ignition;
pub mod provider;
pub mod registry;
pub mod retry;

pub use compose::{IsoInserter, RamdiskInserter};
pub use ignition::{IgnitionBuilder, NetworkStateRenderer, Nmstatectl};
pub use provider::{ImageFormat, ImageProvider, ImageRequest};
pub use registry::{BaseImage, ImageFile, ImageMetadata, ImageRegistry};
pub use retry::retry_delay;
