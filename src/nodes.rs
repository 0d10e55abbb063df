// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Adapters for the two host nodes.
//!
//! The host runtime calls node functions with widget values and expects a
//! fixed-shape tuple back. These adapters validate raw widget input, call
//! the engine or installer, and flatten the result. They never panic.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::installer::Installer;
use crate::platform::PlatformChoice;
use crate::transfer::{DownloadKind, TransferEngine, TransferRequest};

/// Menu category both nodes register under.
pub const CATEGORY: &str = "HMT Suite/Utils";

/// `(status, file_path, message, progress_percentage)`
pub type DownloadTuple = (String, String, String, u8);

/// `(status, installation_path, message)`
pub type InstallTuple = (String, String, String);

/// Downloads into `<root>/models/<destination_folder>`.
pub struct ModelDownloaderNode {
    models_dir: PathBuf,
    engine: Arc<TransferEngine>,
}

impl ModelDownloaderNode {
    pub const NAME: &'static str = "HMT_ModelDownloader";
    pub const DISPLAY_NAME: &'static str = "Model Downloader";
    pub const RETURN_NAMES: [&'static str; 4] = ["status", "file_path", "message", "progress_percentage"];
    pub const DEFAULT_FOLDER: &'static str = "checkpoints";

    pub fn new(models_dir: impl Into<PathBuf>, engine: Arc<TransferEngine>) -> Self {
        Self {
            models_dir: models_dir.into(),
            engine,
        }
    }

    pub fn download_model(
        &self,
        download_type: &str,
        url: &str,
        destination_folder: &str,
        filename: &str,
        overwrite: bool,
        extract_repo: bool,
    ) -> DownloadTuple {
        let url = url.trim();
        if url.is_empty() {
            return download_error("URL is required", 0);
        }
        let kind: DownloadKind = match download_type.parse() {
            Ok(kind) => kind,
            Err(e) => return download_error(e, 0),
        };
        let folder = match models_subfolder(destination_folder) {
            Some(folder) => folder,
            None => {
                return download_error(
                    format!("Destination folder must be a path inside models/: {}", destination_folder),
                    0,
                )
            }
        };

        let request = TransferRequest {
            url: url.to_string(),
            destination: self.models_dir.join(folder),
            filename: None,
            overwrite,
            kind,
            extract: extract_repo,
        }
        .with_filename(filename);

        let outcome = self.engine.begin_transfer(&request);
        if outcome.success {
            let path = outcome
                .file_path
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            ("success".to_string(), path, outcome.message, 100)
        } else {
            download_error(outcome.message, outcome.state.percentage)
        }
    }
}

/// Installs into `<root>/custom_nodes`.
pub struct CustomNodeInstallerNode {
    installer: Arc<Installer>,
}

impl CustomNodeInstallerNode {
    pub const NAME: &'static str = "HMT_CustomNodeInstaller";
    pub const DISPLAY_NAME: &'static str = "Custom Node Installer";
    pub const RETURN_NAMES: [&'static str; 3] = ["status", "installation_path", "message"];

    pub fn new(installer: Arc<Installer>) -> Self {
        Self { installer }
    }

    pub fn install_custom_node(&self, url: &str, platform: &str) -> InstallTuple {
        let url = url.trim();
        if url.is_empty() {
            return ("error".to_string(), String::new(), "URL is required".to_string());
        }
        let choice: PlatformChoice = match platform.parse() {
            Ok(choice) => choice,
            Err(e) => return ("error".to_string(), String::new(), e),
        };

        let result = self.installer.install(url, choice);
        let path = result
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let message = if result.warnings.is_empty() {
            result.message
        } else {
            format!("{} Warnings: {}", result.message, result.warnings.join("; "))
        };
        (result.status.to_string(), path, message)
    }
}

fn download_error(message: impl Into<String>, percentage: u8) -> DownloadTuple {
    ("error".to_string(), String::new(), message.into(), percentage)
}

/// Relative folder under `models/`, or `None` if it is absolute or climbs out.
pub fn models_subfolder(folder: &str) -> Option<PathBuf> {
    let folder = folder.trim();
    let folder = if folder.is_empty() {
        ModelDownloaderNode::DEFAULT_FOLDER
    } else {
        folder
    };
    let path = Path::new(folder);
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    safe.then(|| path.to_path_buf())
}
