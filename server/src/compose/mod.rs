//! Stream composition: base image plus embedded document, no copy on disk.
//!
//! The format-specific byte patching is a capability behind the
//! `IgnitionInserter` trait; the registry consumes it without knowing
//! how an insertion point is found. Two production inserters ship here:
//! an ISO embed-area overlay and a ramdisk archive append.

pub mod initrd;
pub mod overlay;

use std::io::{Read, Seek};
use std::path::Path;

use ember_core::Result;

pub use initrd::RamdiskInserter;
pub use overlay::IsoInserter;

/// An independently seekable read stream over one composed image.
pub trait ImageStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ImageStream for T {}

/// Capability to insert an ignition document into a base image,
/// returning a composed stream. Expensive: implementations re-scan or
/// re-open the base file, so callers invoke it at most once per served
/// record and reuse the stream.
pub trait IgnitionInserter: Send + Sync {
    fn insert(&self, base: &Path, ignition: &[u8]) -> Result<Box<dyn ImageStream>>;

    /// Total length of the stream `insert` would return for a base of
    /// `base_len` bytes, without composing it. Formats that append to
    /// the base override this.
    fn composed_len(&self, base_len: u64, _ignition: &[u8]) -> Result<u64> {
        Ok(base_len)
    }
}
