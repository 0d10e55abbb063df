// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File and repository transfers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hmt_suite::config::Config;
//! use hmt_suite::transfer::{ProgressRegistry, TransferEngine, TransferRequest};
//!
//! let config = Config::default();
//! let registry = Arc::new(ProgressRegistry::new());
//! let engine = TransferEngine::new(&config, registry.clone())?;
//!
//! let request = TransferRequest::file(
//!     "https://huggingface.co/org/model/resolve/main/model.safetensors",
//!     config.models_dir().join("checkpoints"),
//! );
//! let outcome = engine.begin_transfer(&request);
//! println!("{}: {}", outcome.id, outcome.message);
//! # Ok::<(), hmt_suite::error::HmtError>(())
//! ```

pub mod engine;
pub mod fetch;
pub mod registry;
pub mod types;

pub use engine::TransferEngine;
pub use fetch::{FetchResponse, Fetcher, HttpFetcher};
pub use registry::{ProgressRegistry, StatusCounts, TransferHandle};
pub use types::{
    format_size, DownloadKind, TransferId, TransferOutcome, TransferRequest, TransferState, TransferStatus,
};
