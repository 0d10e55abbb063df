// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and user-facing error formatting for hmt-suite.
//!
//! Library operations return [`HmtError`]. Public entry points never let an
//! error escape as a panic: the transfer engine and installer fold failures
//! into structured results, and the CLI renders them with [`ErrorBuilder`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Issues URL printed under CLI errors.
pub const ISSUES_URL: &str = "https://github.com/hmt-suite/hmt-suite/issues";

/// Errors produced by the download and install core.
#[derive(Debug, Error)]
pub enum HmtError {
    /// The URL could not be parsed as an absolute http(s) URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection failure, timeout, or HTTP error status.
    #[error("Network error: {0}")]
    Network(String),

    /// Permission, disk, or path problems.
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Corrupt archive or an entry escaping the destination.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The version-control subprocess failed.
    #[error("Clone failed: {0}")]
    Clone(String),

    /// No usable interpreter where one is required.
    #[error("Environment error: {0}")]
    Environment(String),
}

impl HmtError {
    /// Build an [`HmtError::InvalidUrl`].
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Network(_) => "network",
            Self::Filesystem { .. } => "filesystem",
            Self::Extraction(_) => "extraction",
            Self::Clone(_) => "clone",
            Self::Environment(_) => "environment",
        }
    }
}

impl From<reqwest::Error> for HmtError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {}", e))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<zip::result::ZipError> for HmtError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Extraction(e.to_string())
    }
}

/// Result alias for the library.
pub type Result<T> = std::result::Result<T, HmtError>;

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use hmt_suite::error::format_error;
///
/// let error = format_error(
///     "Failed to clone repository",
///     &["git is not installed", "The repository is private"],
///     &["Install git and make sure it is on PATH"],
/// );
/// println!("{}", error);
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));

    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    /// Create a new error builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Pre-filled builder with the usual causes and fixes for an [`HmtError`].
    pub fn for_error(title: impl Into<String>, error: &HmtError) -> Self {
        Self::for_kind(format!("{}: {}", title.into(), error), error.kind())
    }

    /// Same as [`for_error`](Self::for_error) when only the kind string
    /// survived, e.g. from a `TransferOutcome`.
    pub fn for_kind(title: impl Into<String>, kind: &str) -> Self {
        let builder = Self::new(title);
        match kind {
            "invalid_url" => builder
                .cause("The URL is missing its scheme or host")
                .fix("Use a full URL such as https://github.com/owner/repo"),
            "network" => builder
                .cause("No network connection")
                .cause("The server returned an error status")
                .fix("Open the URL in a browser to check it is reachable"),
            "filesystem" => builder
                .cause("Missing write permission")
                .cause("Disk is full")
                .fix("Check the destination folder: hmt config show"),
            "extraction" => builder
                .cause("The archive is corrupt or incomplete")
                .cause("The archive contains paths outside its folder")
                .fix("Download the archive again or report it to its author"),
            "clone" => builder
                .cause("git is not installed or not on PATH")
                .cause("The repository does not exist or is private")
                .fix("Install git: https://git-scm.com/downloads"),
            "environment" => builder
                .cause("No bundled or system Python was found")
                .fix("Set python_executable: hmt config set-python <path>"),
            _ => builder,
        }
    }

    /// Add a possible cause.
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a suggested fix.
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    /// Build the formatted error message.
    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error(
            "Test Error",
            &["Cause 1", "Cause 2"],
            &["Fix 1", "Fix 2"],
        );

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 2"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(ISSUES_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_builder_for_clone_error() {
        let err = HmtError::Clone("exit status 128".to_string());
        let text = ErrorBuilder::for_error("Install failed", &err).build();
        assert!(text.contains("Install failed: Clone failed: exit status 128"));
        assert!(text.contains("git is not installed"));
    }

    #[test]
    fn test_builder_for_unknown_kind() {
        let text = ErrorBuilder::for_kind("Download failed", "something_else").build();
        assert!(text.starts_with("[✗] Download failed"));
        assert!(!text.contains("Possible causes:"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(HmtError::invalid_url("x", "y").kind(), "invalid_url");
        assert_eq!(HmtError::Network("x".into()).kind(), "network");
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = HmtError::fs("/tmp/x", io);
        assert_eq!(err.kind(), "filesystem");
        assert!(err.to_string().contains("/tmp/x"));
    }
}
