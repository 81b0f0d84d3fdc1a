//! Base image handles.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use ember_core::{EmberError, Result};

use crate::compose::{IgnitionInserter, ImageStream};

/// One immutable base image plus the capability to compose a document
/// into it. Shared read-only by every request for its format.
pub struct BaseImage {
    path: PathBuf,
    size: OnceLock<u64>,
    inserter: Arc<dyn IgnitionInserter>,
}

impl BaseImage {
    pub fn new(path: impl Into<PathBuf>, inserter: Arc<dyn IgnitionInserter>) -> Self {
        Self {
            path: path.into(),
            size: OnceLock::new(),
            inserter,
        }
    }

    /// Byte size of the base image, stat'ed once and memoized.
    ///
    /// A stat failure is never cached; the next call retries.
    pub fn size(&self) -> Result<u64> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }
        let meta = std::fs::metadata(&self.path).map_err(EmberError::BaseImageUnavailable)?;
        let size = meta.len();
        // A concurrent resolver may have won the race; same value either way.
        let _ = self.size.set(size);
        Ok(size)
    }

    /// Length of the stream `compose` would yield for this document.
    ///
    /// Known without composing: the inserter reports how the format
    /// changes the base length.
    pub fn composed_size(&self, ignition: &[u8]) -> Result<u64> {
        self.inserter.composed_len(self.size()?, ignition)
    }

    /// Compose a stream of this image with the document inserted.
    pub fn compose(&self, ignition: &[u8]) -> Result<Box<dyn ImageStream>> {
        self.inserter.insert(&self.path, ignition)
    }
}
