// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Execution platform and Python interpreter resolution.
//!
//! The platform decides which setup scripts run (`.bat` vs `.sh`). The
//! interpreter is located by trying, in order:
//!
//! 1. the configured `python_executable`
//! 2. `<root>/python_embeded/` (portable Windows builds ship this spelling)
//! 3. `<root>/python_embedded/`
//! 4. `python3` / `python` on `PATH`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HmtError, Result};

/// Platform requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformChoice {
    #[default]
    Auto,
    Windows,
    Linux,
}

impl FromStr for PlatformChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            other => Err(format!("Unknown platform '{}' (expected auto, windows or linux)", other)),
        }
    }
}

impl fmt::Display for PlatformChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// Platform the installer acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Windows,
    Linux,
}

impl TargetPlatform {
    /// Detect from an OS name as reported by `std::env::consts::OS`.
    /// Everything that is not Windows runs Linux-style scripts.
    pub fn from_os(os: &str) -> Self {
        if os.eq_ignore_ascii_case("windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    pub fn script_extension(self) -> &'static str {
        match self {
            Self::Windows => "bat",
            Self::Linux => "sh",
        }
    }

    /// Python executable name inside a bundled interpreter folder.
    fn bundled_python(self) -> &'static str {
        match self {
            Self::Windows => "python.exe",
            Self::Linux => "python",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// Outcome of platform resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlatform {
    pub platform: TargetPlatform,
    pub script_extension: &'static str,
    pub interpreter: Option<PathBuf>,
}

impl ResolvedPlatform {
    /// The interpreter, or an environment error naming what was searched.
    pub fn require_interpreter(&self) -> Result<&Path> {
        self.interpreter.as_deref().ok_or_else(|| {
            HmtError::Environment(
                "no Python interpreter found (checked configured path, python_embeded, python_embedded, PATH)"
                    .to_string(),
            )
        })
    }
}

type Strategy = Box<dyn Fn() -> Option<PathBuf> + Send + Sync>;

/// Resolves the platform and interpreter for one host installation.
pub struct PlatformResolver {
    root: PathBuf,
    host_os: String,
    python_override: Option<PathBuf>,
    path_lookup: Strategy,
}

impl fmt::Debug for PlatformResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformResolver")
            .field("root", &self.root)
            .field("host_os", &self.host_os)
            .field("python_override", &self.python_override)
            .finish_non_exhaustive()
    }
}

impl PlatformResolver {
    /// Resolver for `root` on the running OS, searching `PATH` last.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_os: std::env::consts::OS.to_string(),
            python_override: None,
            path_lookup: Box::new(|| {
                ["python3", "python"]
                    .iter()
                    .find_map(|name| which::which(name).ok())
            }),
        }
    }

    /// Pretend to run on `os` (tests and cross-platform previews).
    pub fn with_host_os(mut self, os: impl Into<String>) -> Self {
        self.host_os = os.into();
        self
    }

    pub fn with_python_override(mut self, python: Option<PathBuf>) -> Self {
        self.python_override = python;
        self
    }

    /// Replace the `PATH` search.
    pub fn with_path_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn() -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.path_lookup = Box::new(lookup);
        self
    }

    pub fn detect(&self) -> TargetPlatform {
        TargetPlatform::from_os(&self.host_os)
    }

    pub fn resolve(&self, choice: PlatformChoice) -> ResolvedPlatform {
        let platform = match choice {
            PlatformChoice::Auto => {
                let detected = self.detect();
                tracing::info!("Auto-detected platform: {}", detected);
                detected
            }
            PlatformChoice::Windows => TargetPlatform::Windows,
            PlatformChoice::Linux => TargetPlatform::Linux,
        };

        let interpreter = self.find_interpreter();
        match &interpreter {
            Some(path) => tracing::debug!("Using Python interpreter: {}", path.display()),
            None => tracing::warn!("No Python interpreter found"),
        }

        ResolvedPlatform {
            platform,
            script_extension: platform.script_extension(),
            interpreter,
        }
    }

    fn find_interpreter(&self) -> Option<PathBuf> {
        if let Some(path) = &self.python_override {
            if path.is_file() {
                return Some(path.clone());
            }
            tracing::warn!("Configured python_executable does not exist: {}", path.display());
        }

        // bundled folders follow the host, not the requested script platform
        let host = self.detect();
        for folder in ["python_embeded", "python_embedded"] {
            let candidate = self.root.join(folder).join(host.bundled_python());
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        (self.path_lookup)()
    }
}
