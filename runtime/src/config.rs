//! Configuration.

use anyhow::Context;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::Path;

/// Filename of a Tether config.
pub const FILENAME: &str = "Tether.toml";

/// `Tether.toml`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Label rendered in front of the native representation of a handle.
    pub type_name: String,
    pub detached: DetachedConfig,
}

impl Config {
    /// Reads config from filesystem.
    ///
    /// Returns a default config if the file is not found.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!("`{}` not found, using default config", path.display());
                return Ok(Default::default());
            }
            Err(err) => return Err(err).with_context(|| path.display().to_string()),
        };
        Self::from_toml_str(&raw).with_context(|| path.display().to_string())
    }

    /// Parses a config from TOML.
    pub fn from_toml_str(src: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(src)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            type_name: "NativeHandle".into(),
            detached: Default::default(),
        }
    }
}

/// What rendering a handle does once its runtime is gone.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetachedConfig {
    pub policy: DetachedPolicy,
    pub placeholder: String,
}

impl Default for DetachedConfig {
    fn default() -> Self {
        Self {
            policy: Default::default(),
            placeholder: "<detached>".into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetachedPolicy {
    /// Fail with [Error::DetachedRuntime](crate::Error::DetachedRuntime).
    Fail,

    /// Render [DetachedConfig::placeholder] in place of the native representation.
    Placeholder,
}

impl Default for DetachedPolicy {
    fn default() -> Self {
        DetachedPolicy::Fail
    }
}
