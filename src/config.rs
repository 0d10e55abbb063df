// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent configuration.
//!
//! Stored as JSON at `~/.hmt/config.json`. Every field has a default so a
//! missing or partial file is fine. The host root (the directory holding
//! `models/` and `custom_nodes/`) resolves in this order: explicit override,
//! `HMT_COMFYUI_ROOT`, the config file, the current directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configured host root.
pub const ROOT_ENV_VAR: &str = "HMT_COMFYUI_ROOT";

/// Default port for `hmt serve`.
pub const DEFAULT_PORT: u16 = 8189;

fn default_chunk_size() -> usize {
    8192
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    300
}

fn default_clone_timeout_secs() -> u64 {
    300
}

fn default_script_timeout_secs() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("hmt-suite/{}", env!("CARGO_PKG_VERSION"))
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host installation root. `None` falls back to env / current dir.
    #[serde(default)]
    pub comfyui_root: Option<PathBuf>,
    /// Explicit Python interpreter, checked before bundled and PATH lookups.
    #[serde(default)]
    pub python_executable: Option<PathBuf>,
    /// Read buffer size for streamed downloads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-read inactivity bound on download bodies.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    /// Bound for setup scripts and dependency installs.
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-invocation root (e.g. `--root`), never persisted.
    #[serde(skip)]
    pub root_override: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            comfyui_root: None,
            python_executable: None,
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            clone_timeout_secs: default_clone_timeout_secs(),
            script_timeout_secs: default_script_timeout_secs(),
            user_agent: default_user_agent(),
            port: default_port(),
            root_override: None,
        }
    }
}

impl Config {
    /// Config rooted at `root`, everything else defaulted. Handy for tests and
    /// embedding hosts that already know their layout.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            comfyui_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// `~/.hmt`, or `.hmt` when no home directory is known.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".hmt"))
            .unwrap_or_else(|| PathBuf::from(".hmt"))
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config: {:?}", path))?;
        Ok(())
    }

    /// Absolute host root.
    pub fn root(&self) -> PathBuf {
        let configured = self
            .root_override
            .clone()
            .or_else(|| std::env::var_os(ROOT_ENV_VAR).filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(|| self.comfyui_root.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        absolutize(&configured)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root().join("models")
    }

    pub fn custom_nodes_dir(&self) -> PathBuf {
        self.root().join("custom_nodes")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

/// Make `path` absolute against the current directory without touching the
/// filesystem (the path may not exist yet).
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            tracing::warn!("Cannot read current directory ({}), keeping relative path", e);
            path.to_path_buf()
        }
    }
}
