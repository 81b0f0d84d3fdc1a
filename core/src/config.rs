//! Environment inputs for the image server.
//!
//! All deployment parameters arrive as string-valued environment
//! variables. `EnvInputs::from_env()` reads the process environment;
//! tests use `EnvInputs::from_lookup()` with a map-backed closure.

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};

/// Deployment environment for the image server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvInputs {
    /// Path to the immutable base ISO image (required)
    pub deploy_iso: String,

    /// Path to the immutable base initramfs image (required)
    pub deploy_initrd: String,

    /// Base URL of the provisioning API, one endpoint or a
    /// comma-separated dual-stack pair (required)
    pub api_base_url: String,

    /// Base URL of the inspection callback service
    pub inspector_base_url: String,

    /// Container image reference for the provisioning agent
    pub agent_image: String,

    /// Pull credentials for the agent image
    pub agent_pull_secret: String,

    /// SSH public key authorized in the booted ramdisk
    pub ramdisk_ssh_key: String,

    /// Kernel ip= option string passed to the agent
    pub boot_ip_options: String,

    /// Proxy settings forwarded to the agent service
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,

    /// Interfaces on which the agent inspects VLANs
    pub vlan_interfaces: String,

    /// Path to a registries mirror file to embed
    pub registries_conf_path: String,
}

impl EnvInputs {
    /// Read inputs from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read inputs through an injected lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EmberError::Configuration(format!("{} is required", name)))
        };
        let optional = |name: &str| lookup(name).unwrap_or_default();

        Ok(Self {
            deploy_iso: required("DEPLOY_ISO")?,
            deploy_initrd: required("DEPLOY_INITRD")?,
            api_base_url: required("API_BASE_URL")?,
            inspector_base_url: optional("INSPECTOR_BASE_URL"),
            agent_image: optional("AGENT_IMAGE"),
            agent_pull_secret: optional("AGENT_PULL_SECRET"),
            ramdisk_ssh_key: optional("RAMDISK_SSH_KEY"),
            boot_ip_options: optional("BOOT_IP_OPTIONS"),
            http_proxy: optional("HTTP_PROXY"),
            https_proxy: optional("HTTPS_PROXY"),
            no_proxy: optional("NO_PROXY"),
            vlan_interfaces: optional("VLAN_INTERFACES"),
            registries_conf_path: optional("REGISTRIES_CONF_PATH"),
        })
    }

    /// Read the registries mirror file, if one is configured.
    pub fn registries_conf(&self) -> Result<Option<Vec<u8>>> {
        if self.registries_conf_path.is_empty() {
            return Ok(None);
        }
        let data = std::fs::read(&self.registries_conf_path).map_err(|e| {
            EmberError::Configuration(format!(
                "failed to read registries file {}: {}",
                self.registries_conf_path, e
            ))
        })?;
        Ok(Some(data))
    }
}
