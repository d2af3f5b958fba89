//! CLI settings file
//!
//! The settings file uses TOML format with one section per engine.
//!
//! # Example Configuration
//!
//! ```toml
//! # Path to the JSON file holding the generic inbound list
//! inbounds = "inbounds.json"
//!
//! [xray]
//! binary = "bin/xray-linux-x86_64"
//! api_port = 10085
//!
//! [singbox]
//! binary = "bin/sing-box-linux-x86_64"
//! api_port = 9090
//! api_secret = "change-me"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// JSON file with the generic inbound list
    #[serde(default = "default_inbounds_path")]
    pub inbounds: PathBuf,

    #[serde(default)]
    pub xray: EngineSettings,

    #[serde(default)]
    pub singbox: EngineSettings,
}

/// Per-engine overrides; unset fields fall back to the adapter defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    pub binary: Option<PathBuf>,

    /// Engine config template; the built-in template is used when unset
    pub template: Option<PathBuf>,

    pub api_port: Option<u16>,

    #[serde(default)]
    pub api_secret: String,
}

fn default_inbounds_path() -> PathBuf {
    PathBuf::from("inbounds.json")
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read settings from {:?}", path.as_ref()))?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).context("invalid settings file")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if let (Some(a), Some(b)) = (self.xray.api_port, self.singbox.api_port) {
            if a == b {
                bail!("xray and singbox cannot share api_port {}", a);
            }
        }
        if self.xray.api_port == Some(0) || self.singbox.api_port == Some(0) {
            bail!("api_port must be non-zero");
        }
        Ok(())
    }

    /// Generate a sample settings file
    pub fn sample() -> String {
        r#"# coremux configuration

# Path to the JSON file holding the generic inbound list
inbounds = "inbounds.json"

[xray]
# Engine binary; defaults to bin/xray-<os>-<arch>
#binary = "bin/xray-linux-x86_64"
# Engine config template; a built-in template is used when unset
#template = "templates/xray.json"
# Local stats bridge port
api_port = 10085

[singbox]
#binary = "bin/sing-box-linux-x86_64"
#template = "templates/singbox.json"
# Clash management API port
api_port = 9090
# Bearer token for the management API; empty disables auth
api_secret = ""
"#
        .to_string()
    }
}
