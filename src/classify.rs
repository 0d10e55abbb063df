// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! URL classification.
//!
//! Maps a URL string to a download strategy before any I/O happens:
//!
//! | URL shape                                              | Target                      |
//! |--------------------------------------------------------|-----------------------------|
//! | `raw.githubusercontent.com/o/r/ref/path`               | [`GitHubTarget::Raw`]          |
//! | `github.com/o/r/releases/download/tag/asset`           | [`GitHubTarget::ReleaseAsset`] |
//! | `github.com/o/r/blob/ref/path`                         | [`GitHubTarget::Blob`]         |
//! | `github.com/o/r` (optional `/` or `.git`)              | [`GitHubTarget::Repository`]   |
//! | any other absolute http(s) URL                         | [`UrlTarget::DirectFile`]      |
//!
//! Anything that does not parse as an absolute http(s) URL is an
//! [`HmtError::InvalidUrl`].
//!
//! # Example
//!
//! ```
//! use hmt_suite::classify::{classify, GitHubTarget, UrlTarget};
//!
//! let target = classify("https://github.com/city96/ComfyUI-GGUF/releases/download/v1.0/node.zip").unwrap();
//! assert!(matches!(
//!     target,
//!     UrlTarget::GitHub(GitHubTarget::ReleaseAsset { ref tag, .. }) if tag == "v1.0"
//! ));
//! ```

use percent_encoding::percent_decode_str;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{HmtError, Result};

const GITHUB_HOSTS: &[&str] = &["github.com", "www.github.com"];
const RAW_HOST: &str = "raw.githubusercontent.com";

/// A GitHub-hosted download target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitHubTarget {
    Repository {
        owner: String,
        repo: String,
    },
    /// A file viewed in the web UI; fetched through its raw URL.
    Blob {
        owner: String,
        repo: String,
        reference: String,
        path: String,
    },
    Raw {
        owner: String,
        repo: String,
        reference: String,
        path: String,
    },
    ReleaseAsset {
        owner: String,
        repo: String,
        tag: String,
        asset: String,
    },
}

impl GitHubTarget {
    pub fn owner(&self) -> &str {
        match self {
            Self::Repository { owner, .. }
            | Self::Blob { owner, .. }
            | Self::Raw { owner, .. }
            | Self::ReleaseAsset { owner, .. } => owner,
        }
    }

    pub fn repo(&self) -> &str {
        match self {
            Self::Repository { repo, .. }
            | Self::Blob { repo, .. }
            | Self::Raw { repo, .. }
            | Self::ReleaseAsset { repo, .. } => repo,
        }
    }

    /// Short name used in logs and API output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Repository { .. } => "repository",
            Self::Blob { .. } => "blob",
            Self::Raw { .. } => "raw",
            Self::ReleaseAsset { .. } => "release_asset",
        }
    }

    /// URL that serves the target's bytes.
    ///
    /// For a repository this is the `main` branch archive; see
    /// [`GitHubTarget::archive_urls`] for the full fallback list.
    pub fn download_url(&self) -> String {
        match self {
            Self::Repository { owner, repo } => {
                format!("https://github.com/{}/{}/archive/refs/heads/main.zip", owner, repo)
            }
            Self::Blob { owner, repo, reference, path } | Self::Raw { owner, repo, reference, path } => {
                format!("https://{}/{}/{}/{}/{}", RAW_HOST, owner, repo, reference, path)
            }
            Self::ReleaseAsset { owner, repo, tag, asset } => {
                format!("https://github.com/{}/{}/releases/download/{}/{}", owner, repo, tag, asset)
            }
        }
    }

    /// Branch archives to try for a repository, in order. Empty for files.
    pub fn archive_urls(&self) -> Vec<(String, String)> {
        match self {
            Self::Repository { owner, repo } => ["main", "master"]
                .iter()
                .map(|branch| {
                    (
                        branch.to_string(),
                        format!(
                            "https://github.com/{}/{}/archive/refs/heads/{}.zip",
                            owner, repo, branch
                        ),
                    )
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Local filename the target downloads to.
    pub fn filename(&self) -> String {
        match self {
            Self::Repository { repo, .. } => format!("{}.zip", repo),
            Self::Blob { path, .. } | Self::Raw { path, .. } => {
                let last = path.rsplit('/').next().unwrap_or(path);
                sanitize_filename(&percent_decode(last)).unwrap_or_else(|| last.to_string())
            }
            Self::ReleaseAsset { asset, .. } => {
                sanitize_filename(&percent_decode(asset)).unwrap_or_else(|| asset.clone())
            }
        }
    }
}

/// Result of classifying a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlTarget {
    DirectFile(Url),
    GitHub(GitHubTarget),
}

impl UrlTarget {
    /// Filename known from the URL alone, without contacting the server.
    pub fn filename_hint(&self) -> Option<String> {
        match self {
            Self::DirectFile(url) => filename_from_url(url),
            Self::GitHub(target) => Some(target.filename()),
        }
    }
}

/// Classify `input` into a download target.
pub fn classify(input: &str) -> Result<UrlTarget> {
    let url = parse_absolute(input)?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if host == RAW_HOST && segments.len() >= 4 {
        return Ok(UrlTarget::GitHub(GitHubTarget::Raw {
            owner: segments[0].to_string(),
            repo: segments[1].to_string(),
            reference: segments[2].to_string(),
            path: segments[3..].join("/"),
        }));
    }

    if GITHUB_HOSTS.contains(&host.as_str()) {
        if let Some(target) = classify_github_path(&segments) {
            return Ok(UrlTarget::GitHub(target));
        }
    }

    Ok(UrlTarget::DirectFile(url))
}

fn classify_github_path(segments: &[&str]) -> Option<GitHubTarget> {
    if segments.len() < 2 {
        return None;
    }
    let owner = segments[0].to_string();
    let repo = segments[1];

    if segments.len() >= 6 && segments[2] == "releases" && segments[3] == "download" {
        return Some(GitHubTarget::ReleaseAsset {
            owner,
            repo: repo.to_string(),
            tag: segments[4].to_string(),
            asset: segments[segments.len() - 1].to_string(),
        });
    }

    if segments.len() >= 5 && segments[2] == "blob" {
        return Some(GitHubTarget::Blob {
            owner,
            repo: repo.to_string(),
            reference: segments[3].to_string(),
            path: segments[4..].join("/"),
        });
    }

    if segments.len() == 2 {
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if !repo.is_empty() {
            return Some(GitHubTarget::Repository {
                owner,
                repo: repo.to_string(),
            });
        }
    }

    None
}

/// Parse an absolute http(s) URL or fail with [`HmtError::InvalidUrl`].
pub fn parse_absolute(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(HmtError::invalid_url(input, "URL is required"));
    }
    let url = Url::parse(trimmed).map_err(|e| HmtError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(HmtError::invalid_url(
                input,
                format!("unsupported scheme '{}'", other),
            ))
        }
    }
    match url.host_str() {
        Some(h) if !h.is_empty() => Ok(url),
        _ => Err(HmtError::invalid_url(input, "missing host")),
    }
}

/// Last path segment of `url`, decoded, query excluded.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    sanitize_filename(&percent_decode(last))
}

/// Filename from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.trim().trim_matches('"');
                let encoded = encoded.split("''").last().unwrap_or(encoded);
                if let Some(name) = sanitize_filename(&percent_decode(encoded)) {
                    return Some(name);
                }
            }
            "filename" => {
                let name = raw.trim().trim_matches(|c| c == '"' || c == '\'');
                plain = sanitize_filename(&percent_decode(name));
            }
            _ => {}
        }
    }
    plain
}

/// Name for a download whose URL and headers give none:
/// `downloaded_file_<8 hex>` plus an extension guessed from `content_type`.
pub fn generated_filename(url: &str, content_type: Option<&str>) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let short = &hex::encode(digest)[..8];
    format!("downloaded_file_{}{}", short, extension_for_content_type(content_type))
}

fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(|c| c.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "application/zip" | "application/x-zip-compressed" => ".zip",
        "application/json" => ".json",
        "text/plain" => ".txt",
        "application/gzip" | "application/x-gzip" => ".gz",
        "application/x-tar" => ".tar",
        _ => ".bin",
    }
}

/// Reduce `name` to a bare file name; `None` if nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github(url: &str) -> GitHubTarget {
        match classify(url).unwrap() {
            UrlTarget::GitHub(t) => t,
            other => panic!("expected GitHub target, got {:?}", other),
        }
    }

    #[test]
    fn test_release_asset() {
        let target = github("https://github.com/city96/ComfyUI-GGUF/releases/download/v1.0/node.zip");
        assert_eq!(
            target,
            GitHubTarget::ReleaseAsset {
                owner: "city96".into(),
                repo: "ComfyUI-GGUF".into(),
                tag: "v1.0".into(),
                asset: "node.zip".into(),
            }
        );
        assert_eq!(target.filename(), "node.zip");
        assert_eq!(
            target.download_url(),
            "https://github.com/city96/ComfyUI-GGUF/releases/download/v1.0/node.zip"
        );
    }

    #[test]
    fn test_raw() {
        let target = github("https://raw.githubusercontent.com/user/repo/main/models/v1/weights.safetensors");
        assert_eq!(
            target,
            GitHubTarget::Raw {
                owner: "user".into(),
                repo: "repo".into(),
                reference: "main".into(),
                path: "models/v1/weights.safetensors".into(),
            }
        );
        assert_eq!(target.filename(), "weights.safetensors");
    }

    #[test]
    fn test_blob_resolves_to_raw_url() {
        let target = github("https://github.com/user/repo/blob/dev/configs/a%20b.yaml");
        assert_eq!(
            target,
            GitHubTarget::Blob {
                owner: "user".into(),
                repo: "repo".into(),
                reference: "dev".into(),
                path: "configs/a%20b.yaml".into(),
            }
        );
        assert_eq!(
            target.download_url(),
            "https://raw.githubusercontent.com/user/repo/dev/configs/a%20b.yaml"
        );
        assert_eq!(target.filename(), "a b.yaml");
    }

    #[test]
    fn test_repository_shapes() {
        for url in [
            "https://github.com/comfyanonymous/ComfyUI",
            "https://github.com/comfyanonymous/ComfyUI/",
            "https://github.com/comfyanonymous/ComfyUI.git",
        ] {
            assert_eq!(
                github(url),
                GitHubTarget::Repository {
                    owner: "comfyanonymous".into(),
                    repo: "ComfyUI".into(),
                },
                "url: {}",
                url
            );
        }
        let repo = github("https://github.com/comfyanonymous/ComfyUI");
        assert_eq!(repo.filename(), "ComfyUI.zip");
        let archives = repo.archive_urls();
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].0, "main");
        assert!(archives[1].1.ends_with("/refs/heads/master.zip"));
    }

    #[test]
    fn test_raw_priority_over_github() {
        // A raw URL whose path happens to contain "blob" is still raw.
        let target = github("https://raw.githubusercontent.com/o/r/blob/x/y");
        assert_eq!(target.kind(), "raw");
    }

    #[test]
    fn test_other_github_pages_are_direct() {
        for url in [
            "https://github.com/owner",
            "https://github.com/owner/repo/tree/main",
            "https://github.com/owner/repo/releases/download/v1",
        ] {
            assert!(matches!(classify(url).unwrap(), UrlTarget::DirectFile(_)), "url: {}", url);
        }
    }

    #[test]
    fn test_direct_file_filename() {
        let target = classify("https://huggingface.co/x/y/resolve/main/model.safetensors?download=true").unwrap();
        assert!(matches!(target, UrlTarget::DirectFile(_)));
        assert_eq!(target.filename_hint().as_deref(), Some("model.safetensors"));

        let bare = classify("https://example.com/").unwrap();
        assert_eq!(bare.filename_hint(), None);
    }

    #[test]
    fn test_invalid_urls() {
        for url in ["not a url", "", "   ", "/relative/path", "ftp://example.com/file", "file:///etc/passwd"] {
            let err = classify(url).unwrap_err();
            assert_eq!(err.kind(), "invalid_url", "url: {:?}", url);
        }
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"model.ckpt\"").as_deref(),
            Some("model.ckpt")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=a.bin; filename*=UTF-8''b%20c.bin").as_deref(),
            Some("b c.bin")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"../../etc/passwd\"").as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn test_generated_filename() {
        let a = generated_filename("https://example.com/", Some("application/zip"));
        let b = generated_filename("https://example.com/", None);
        assert!(a.starts_with("downloaded_file_"));
        assert!(a.ends_with(".zip"));
        assert!(b.ends_with(".bin"));
        assert_eq!(a.len(), "downloaded_file_".len() + 8 + 4);
    }

    #[test]
    fn test_percent_decode_edges() {
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%41%42"), "AB");
        assert_eq!(percent_decode("my%20model.safetensors"), "my model.safetensors");
        assert_eq!(percent_decode("%ff.bin"), "\u{fffd}.bin");
    }
}
