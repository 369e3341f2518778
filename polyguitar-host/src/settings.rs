//! # Settings Module
//!
//! Loads the host configuration from TOML or JSON. Every field is optional;
//! missing ones take their defaults.

use std::path::Path;

use anyhow::{Context, Result, bail};
use polyguitar_core::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Everything the binary needs: the core pipeline plus MIDI transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub pipeline: PipelineConfig,
    pub midi: MidiSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Preferred output port. Matched exactly, then as a case-insensitive
    /// substring; the first available port is used otherwise.
    pub port: Option<String>,
    /// Name of the virtual port created when no output port exists.
    pub virtual_port_name: String,
    /// Client name shown to other MIDI applications.
    pub client_name: String,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            port: None,
            virtual_port_name: "PolyGuitar".to_string(),
            client_name: "polyguitar".to_string(),
        }
    }
}

impl HostConfig {
    /// Reads a configuration file, choosing the format from its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config = match extension.as_str() {
            "toml" => Self::from_toml(&text),
            "json" => Self::from_json(&text),
            other => bail!("unsupported config format '{other}' (expected .toml or .json)"),
        }
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

        log::info!("[CONFIG] Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
