// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! hmt-suite - Model downloader and custom node installer
//!
//! Fetches model files and GitHub repositories into a node-graph host's
//! `models/` tree, and installs custom node packages into `custom_nodes/`
//! (clone or archive, then setup script and Python requirements).
//!
//! # Core Modules
//!
//! - [`classify`] - URL classification and filename derivation
//! - [`transfer`] - Streamed downloads with a shared progress registry
//! - [`archive`] - Zip extraction with path traversal checks
//! - [`installer`] - Custom node installation pipeline
//! - [`platform`] - Target platform and Python interpreter resolution
//! - [`process`] - Bounded subprocess execution
//! - [`nodes`] - Host node adapters returning fixed-shape tuples
//! - [`discovery`] - Installed models and custom nodes
//! - [`server`] - HTTP API for progress polling
//! - [`config`] - Persistent configuration
//! - [`error`] - Error kinds and formatted error messages

pub mod archive;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod error;
pub mod installer;
pub mod locks;
pub mod nodes;
pub mod platform;
pub mod process;
pub mod server;
pub mod transfer;

pub use classify::{classify, GitHubTarget, UrlTarget};
pub use config::Config;
pub use error::{HmtError, Result};
pub use installer::{InstallResult, InstallStatus, Installer};
pub use nodes::{CustomNodeInstallerNode, ModelDownloaderNode};
pub use platform::{PlatformChoice, PlatformResolver, TargetPlatform};
pub use transfer::{
    DownloadKind, ProgressRegistry, TransferEngine, TransferId, TransferOutcome, TransferRequest,
    TransferState, TransferStatus,
};
