//! Static preload: publish images for a directory of network states.
//!
//! Each YAML file in the directory describes one machine's desired
//! network state; its stem doubles as the machine's hostname. Every
//! machine gets both formats, served under fixed names so external
//! tooling can construct the URLs without asking us.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ember_core::EnvInputs;
use ember_server::{IgnitionBuilder, ImageRegistry, NetworkStateRenderer};
use tracing::info;

/// Build and serve a static image pair for every YAML file in `dir`.
pub fn preload_directory(
    registry: &Arc<ImageRegistry>,
    inputs: &EnvInputs,
    renderer: &dyn NetworkStateRenderer,
    dir: &Path,
) -> Result<()> {
    let registries_conf = inputs.registries_conf()?;

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read network state directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let state = std::fs::read(&path)
            .with_context(|| format!("cannot read network state {}", path.display()))?;
        let ignition = IgnitionBuilder::new(inputs, renderer)
            .hostname(stem)
            .network_state(state)
            .registries_conf(registries_conf.clone())
            .build()?
            .to_bytes()?;

        for (suffix, initramfs) in [("iso", false), ("initramfs", true)] {
            let name = format!("{}.{}", stem, suffix);
            let url = registry.serve(&name, ignition.clone(), initramfs, true)?;
            info!(host = %stem, url = %url, "serving static image");
        }
    }
    Ok(())
}
