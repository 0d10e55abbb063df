// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer request, state, and outcome types.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::sanitize_filename;
use crate::error::{HmtError, Result};

/// How a request URL should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// Download the URL as-is.
    #[default]
    File,
    /// Resolve GitHub repository/blob/raw/release URLs first.
    Github,
}

impl FromStr for DownloadKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "github" => Ok(Self::Github),
            other => Err(format!("Invalid download type: {}", other)),
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Github => write!(f, "github"),
        }
    }
}

/// Immutable description of one requested transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: String,
    /// Directory the file (or extracted repository) lands in.
    pub destination: PathBuf,
    /// Explicit filename; inferred from the URL or response when `None`.
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub kind: DownloadKind,
    /// Extract repository archives after download. Ignored for files.
    #[serde(default = "default_extract")]
    pub extract: bool,
}

fn default_extract() -> bool {
    true
}

impl TransferRequest {
    /// Plain file download of `url` into `destination`.
    pub fn file(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            filename: None,
            overwrite: false,
            kind: DownloadKind::File,
            extract: true,
        }
    }

    /// GitHub-aware download of `url` into `destination`.
    pub fn github(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind: DownloadKind::Github,
            ..Self::file(url, destination)
        }
    }

    /// Set an explicit filename. Blank names are treated as absent.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        self.filename = if filename.trim().is_empty() {
            None
        } else {
            Some(filename.trim().to_string())
        };
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    /// Reject an explicit filename that is not a single plain path component,
    /// so the written file always stays inside `destination`.
    pub fn validate(&self) -> Result<()> {
        let Some(name) = self.filename.as_deref() else {
            return Ok(());
        };
        let mut components = Path::new(name).components();
        let plain = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none()
            && sanitize_filename(name).as_deref() == Some(name);
        if plain {
            Ok(())
        } else {
            Err(HmtError::invalid_url(
                &self.url,
                format!("filename {:?} must be a plain file name", name),
            ))
        }
    }
}

/// Lifecycle of a transfer. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Downloading,
    Extracting,
    Completed,
    Error,
}

impl TransferStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Extracting => 2,
            Self::Completed | Self::Error => 3,
        }
    }

    /// Returns true once the transfer has finished (success or failure).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true if the transfer is moving bytes or unpacking them.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Extracting)
    }

    /// Whether `next` may follow `self`. Staying put is allowed; going back or
    /// leaving a terminal state is not.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key of a transfer in the progress registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Fresh id for a transfer of `url`, unique within the process.
    pub fn generate(url: &str) -> Self {
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        Self(hex::encode(&hasher.finalize()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress record of one transfer, as seen by registry readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub url: String,
    pub status: TransferStatus,
    pub downloaded: u64,
    /// Unknown until response headers arrive (and absent without Content-Length).
    pub total_size: Option<u64>,
    /// 0-100, never decreases.
    pub percentage: u8,
    pub filename: Option<String>,
    pub destination: Option<PathBuf>,
    pub error_message: Option<String>,
    /// The destination already existed and nothing was fetched.
    #[serde(default)]
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferState {
    /// A `pending` state for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            url: url.into(),
            status: TransferStatus::Pending,
            downloaded: 0,
            total_size: None,
            percentage: 0,
            filename: None,
            destination: None,
            error_message: None,
            skipped: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record `downloaded` bytes out of `total`.
    ///
    /// The first byte moves a pending transfer to `downloading`. The
    /// percentage is recomputed only when the total is known and non-zero;
    /// otherwise it keeps its last value.
    pub fn record_progress(&mut self, downloaded: u64, total: Option<u64>) {
        if downloaded > 0 && self.status == TransferStatus::Pending {
            self.status = TransferStatus::Downloading;
        }
        self.downloaded = downloaded;
        if total.is_some() {
            self.total_size = total;
        }
        if let Some(total) = self.total_size.filter(|t| *t > 0) {
            let pct = (downloaded.saturating_mul(100) / total).min(100) as u8;
            self.percentage = self.percentage.max(pct);
        }
    }

    /// Human-readable "12.3 MB / 45.6 MB" style progress.
    pub fn size_string(&self) -> String {
        match self.total_size {
            Some(total) => format!("{} / {}", format_size(self.downloaded), format_size(total)),
            None => format_size(self.downloaded),
        }
    }
}

/// Structured result of a transfer call.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub id: TransferId,
    pub success: bool,
    pub message: String,
    /// Downloaded file, or extracted folder for repositories.
    pub file_path: Option<PathBuf>,
    pub skipped: bool,
    pub file_size: Option<u64>,
    /// Error kind (see `HmtError::kind`) when `success` is false.
    pub error_kind: Option<&'static str>,
    pub state: TransferState,
}

/// Format a byte count for logs and terminal output.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
