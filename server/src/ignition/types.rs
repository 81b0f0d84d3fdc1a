//! Ignition document value objects.
//!
//! A minimal serde model of the ignition v3.2.0 wire format: embedded
//! files, systemd units, and login accounts. Documents are assembled by
//! the builder, validated once, and immutable afterwards.

use ember_core::{EmberError, Result};
use serde::{Deserialize, Serialize};

/// Ignition wire-format version emitted by the builder.
pub const IGNITION_VERSION: &str = "3.2.0";

/// A complete ignition document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IgnitionConfig {
    pub ignition: IgnitionMeta,
    #[serde(default, skip_serializing_if = "Storage::is_empty")]
    pub storage: Storage,
    #[serde(default, skip_serializing_if = "Systemd::is_empty")]
    pub systemd: Systemd,
    #[serde(default, skip_serializing_if = "Passwd::is_empty")]
    pub passwd: Passwd,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IgnitionMeta {
    pub version: String,
}

impl Default for IgnitionMeta {
    fn default() -> Self {
        Self {
            version: IGNITION_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

impl Storage {
    fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// An embedded file: absolute path, mode, and content as a data URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    pub contents: Contents,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Contents {
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Systemd {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
}

impl Systemd {
    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A systemd unit carried verbatim in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Passwd {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<PasswdUser>,
}

impl Passwd {
    fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// A login account with authorized SSH keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PasswdUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}

impl IgnitionConfig {
    /// Check structural well-formedness: the mandatory agent config file
    /// and service unit must be present, and no two files may share a path.
    pub fn validate(&self) -> Result<()> {
        if self.storage.files.is_empty() {
            return Err(EmberError::Configuration(
                "document has no embedded files".to_string(),
            ));
        }
        if self.systemd.units.is_empty() {
            return Err(EmberError::Configuration(
                "document has no service units".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for file in &self.storage.files {
            if !seen.insert(file.path.as_str()) {
                return Err(EmberError::Configuration(format!(
                    "duplicate file path {}",
                    file.path
                )));
            }
        }
        Ok(())
    }

    /// Serialize the validated document to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }
}
