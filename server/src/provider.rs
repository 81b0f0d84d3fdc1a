//! Reconciliation-facing provider.
//!
//! The adapter a controller loop calls for each machine: it derives the
//! registry key from the machine's identity, builds the per-machine
//! ignition document, and registers the image. The caller never sees
//! the registry or the builder directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ember_core::{EnvInputs, Result};

use crate::ignition::{IgnitionBuilder, NetworkStateRenderer};
use crate::registry::ImageRegistry;

/// Key of the network-state entry in a machine's network-data map.
const NMSTATE_KEY: &str = "nmstate";

/// Boot-image formats the registry can compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Iso,
    Initramfs,
}

impl ImageFormat {
    pub fn is_initramfs(&self) -> bool {
        matches!(self, ImageFormat::Initramfs)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Iso => write!(f, "iso"),
            ImageFormat::Initramfs => write!(f, "initramfs"),
        }
    }
}

/// Identity of one machine's requested image.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub architecture: String,
    pub format: ImageFormat,
}

impl ImageRequest {
    /// Registry key for this request. Stable across reconciliations of
    /// the same machine object.
    pub fn image_key(&self) -> String {
        format!(
            "{}-{}-{}-{}.{}",
            self.namespace, self.name, self.uid, self.architecture, self.format
        )
    }
}

/// Builds and publishes per-machine images on demand.
pub struct ImageProvider {
    registry: Arc<ImageRegistry>,
    inputs: EnvInputs,
    registries_conf: Option<Vec<u8>>,
    renderer: Box<dyn NetworkStateRenderer>,
}

impl ImageProvider {
    /// The registries override file is read once at startup; a
    /// deployment changing it rolls the process.
    pub fn new(
        registry: Arc<ImageRegistry>,
        inputs: EnvInputs,
        renderer: Box<dyn NetworkStateRenderer>,
    ) -> Result<Self> {
        let registries_conf = inputs.registries_conf()?;
        Ok(Self {
            registry,
            inputs,
            registries_conf,
            renderer,
        })
    }

    pub fn supports_format(&self, format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Iso | ImageFormat::Initramfs)
    }

    /// Build the machine's document and serve its image, returning the
    /// public URL. A machine without an `nmstate` entry gets a document
    /// with no network profiles.
    pub fn build_image(
        &self,
        request: &ImageRequest,
        network_data: &HashMap<String, Vec<u8>>,
        hostname: &str,
    ) -> Result<String> {
        let mut builder = IgnitionBuilder::new(&self.inputs, self.renderer.as_ref())
            .hostname(hostname)
            .registries_conf(self.registries_conf.clone());
        if let Some(state) = network_data.get(NMSTATE_KEY) {
            builder = builder.network_state(state.clone());
        }
        let ignition = builder.build()?.to_bytes()?;

        tracing::info!(
            namespace = %request.namespace,
            name = %request.name,
            format = %request.format,
            "building image"
        );
        self.registry.serve(
            &request.image_key(),
            ignition,
            request.format.is_initramfs(),
            false,
        )
    }

    /// Drop the machine's image. Safe to call for machines never served.
    pub fn discard_image(&self, request: &ImageRequest) {
        self.registry.remove(&request.image_key());
    }
}
