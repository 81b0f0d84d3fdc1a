//! Network profile transformer.
//!
//! Raw declarative network state is normalized by an external tool
//! (`nmstatectl gc -`) into named NetworkManager connection profiles.
//! The tool invocation sits behind the `NetworkStateRenderer` trait so
//! tests substitute a fake instead of spawning a subprocess.

use std::io::Write;
use std::process::{Command, Stdio};

use ember_core::{EmberError, Result};
use serde::Deserialize;

use super::encode::plain_text_uri;
use super::types::{Contents, File};

/// Directory receiving generated connection profiles.
const PROFILE_DIR: &str = "/etc/NetworkManager/system-connections/";

/// Profile files are readable by NetworkManager only.
const PROFILE_MODE: u32 = 0o600;

/// Normalizes raw network-state bytes into tool output bytes.
pub trait NetworkStateRenderer: Send + Sync {
    fn render(&self, network_state: &[u8]) -> Result<Vec<u8>>;
}

/// Renderer backed by the `nmstatectl` binary.
#[derive(Debug, Default)]
pub struct Nmstatectl;

impl NetworkStateRenderer for Nmstatectl {
    fn render(&self, network_state: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new("nmstatectl")
            .arg("gc")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EmberError::NetworkState(format!("failed to spawn nmstatectl: {}", e)))?;

        // stdin is piped above, so take() cannot fail
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(network_state)
                .map_err(|e| EmberError::NetworkState(format!("failed to feed nmstatectl: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| EmberError::NetworkState(format!("nmstatectl did not complete: {}", e)))?;

        if !output.status.success() {
            return Err(EmberError::NetworkState(format!(
                "nmstatectl failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::debug!(bytes = output.stdout.len(), "rendered network state");
        Ok(output.stdout)
    }
}

/// Tool output: named profiles under a well-known top-level key.
#[derive(Debug, Default, Deserialize)]
struct RenderedProfiles {
    #[serde(rename = "NetworkManager")]
    network_manager: Option<Vec<(String, String)>>,
}

/// Parse renderer output into embedded connection-profile files.
///
/// Output without the `NetworkManager` key yields no files, not an error.
pub fn profiles_to_files(rendered: &[u8]) -> Result<Vec<File>> {
    // An empty or null document is valid output for a state with no
    // interfaces, so deserialize through Option.
    let parsed: Option<RenderedProfiles> = serde_yaml::from_slice(rendered)
        .map_err(|e| EmberError::NetworkState(format!("unparseable renderer output: {}", e)))?;

    let profiles = match parsed.and_then(|p| p.network_manager) {
        Some(profiles) => profiles,
        None => return Ok(Vec::new()),
    };

    Ok(profiles
        .into_iter()
        .map(|(name, body)| File {
            path: format!("{}{}", PROFILE_DIR, name),
            overwrite: Some(true),
            mode: Some(PROFILE_MODE),
            contents: Contents {
                source: plain_text_uri(&body),
            },
        })
        .collect())
}
