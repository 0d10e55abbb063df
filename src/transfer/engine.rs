// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streamed downloads with progress accounting.
//!
//! A transfer runs synchronously on the calling thread. It registers a
//! `pending` entry, streams the body into `<file>.part` while updating the
//! entry on every chunk, and renames the part file over the destination on
//! success. Failures leave the part file behind and the previous destination
//! untouched.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fetch::{FetchResponse, Fetcher, HttpFetcher};
use super::registry::{ProgressRegistry, TransferHandle};
use super::types::{format_size, DownloadKind, TransferOutcome, TransferRequest, TransferStatus};
use crate::archive;
use crate::classify::{self, GitHubTarget, UrlTarget};
use crate::config::{absolutize, Config};
use crate::error::{HmtError, Result};

/// What a finished transfer produced.
#[derive(Debug)]
struct Finished {
    path: PathBuf,
    size: Option<u64>,
    skipped: bool,
    message: String,
}

/// Runs transfers and records their progress in a shared registry.
pub struct TransferEngine {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<ProgressRegistry>,
    chunk_size: usize,
}

impl TransferEngine {
    /// Engine using the blocking HTTP client configured by `config`.
    pub fn new(config: &Config, registry: Arc<ProgressRegistry>) -> Result<Self> {
        let fetcher = HttpFetcher::new(config)?;
        Ok(Self::with_fetcher(Arc::new(fetcher), registry, config.chunk_size))
    }

    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>, registry: Arc<ProgressRegistry>, chunk_size: usize) -> Self {
        Self {
            fetcher,
            registry,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Register and run `request` on the calling thread.
    pub fn begin_transfer(&self, request: &TransferRequest) -> TransferOutcome {
        let handle = self.prepare(request);
        self.run(handle, request)
    }

    /// Register a `pending` entry so callers can poll before [`run`](Self::run).
    pub fn prepare(&self, request: &TransferRequest) -> TransferHandle {
        self.registry.register(&request.url)
    }

    /// Execute a prepared transfer. Never panics on transfer failure; errors
    /// end up in the registry entry and in the returned outcome.
    pub fn run(&self, handle: TransferHandle, request: &TransferRequest) -> TransferOutcome {
        match self.run_checked(&handle, request) {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome {
                id: handle.id().clone(),
                success: false,
                message: format!("Download failed: {}", e),
                file_path: None,
                skipped: false,
                file_size: None,
                error_kind: Some(e.kind()),
                state: handle.snapshot(),
            },
        }
    }

    /// Register and run `request`, handing the error back to the caller.
    /// The registry entry is marked failed either way.
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferOutcome> {
        let handle = self.prepare(request);
        self.run_checked(&handle, request)
    }

    fn run_checked(&self, handle: &TransferHandle, request: &TransferRequest) -> Result<TransferOutcome> {
        tracing::info!("Starting {} download: {}", request.kind, request.url);

        let done = match self.execute(handle, request) {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("Download failed: {}", e);
                handle.fail(e.to_string());
                return Err(e);
            }
        };

        if done.skipped {
            tracing::info!("{}: {}", done.message, done.path.display());
        } else {
            tracing::info!("Download complete: {}", done.path.display());
        }
        Ok(TransferOutcome {
            id: handle.id().clone(),
            success: true,
            message: done.message,
            file_path: Some(done.path),
            skipped: done.skipped,
            file_size: done.size,
            error_kind: None,
            state: handle.snapshot(),
        })
    }

    fn execute(&self, handle: &TransferHandle, request: &TransferRequest) -> Result<Finished> {
        request.validate()?;
        let target = classify::classify(&request.url)?;
        let destination = absolutize(&request.destination);

        match (request.kind, target) {
            (DownloadKind::File, target) => {
                let filename = request.filename.clone().or_else(|| match &target {
                    UrlTarget::DirectFile(url) => classify::filename_from_url(url),
                    UrlTarget::GitHub(_) => url::Url::parse(&request.url)
                        .ok()
                        .and_then(|u| classify::filename_from_url(&u)),
                });
                self.download_file(handle, &request.url, &destination, filename, request.overwrite)
            }
            (DownloadKind::Github, UrlTarget::DirectFile(_)) => {
                Err(HmtError::invalid_url(&request.url, "not a GitHub URL"))
            }
            (DownloadKind::Github, UrlTarget::GitHub(target @ GitHubTarget::Repository { .. })) => {
                self.download_repository(handle, &target, &destination, request.overwrite, request.extract)
            }
            (DownloadKind::Github, UrlTarget::GitHub(target)) => {
                tracing::info!("Detected GitHub {}: {}/{}", target.kind(), target.owner(), target.repo());
                let filename = request.filename.clone().unwrap_or_else(|| target.filename());
                self.download_file(
                    handle,
                    &target.download_url(),
                    &destination,
                    Some(filename),
                    request.overwrite,
                )
            }
        }
    }

    /// Download `url` into `dir`. The existence check runs before the request
    /// when `filename` is known, otherwise right after the response headers.
    fn download_file(
        &self,
        handle: &TransferHandle,
        url: &str,
        dir: &Path,
        filename: Option<String>,
        overwrite: bool,
    ) -> Result<Finished> {
        fs::create_dir_all(dir).map_err(|e| HmtError::fs(dir, e))?;

        if let Some(name) = &filename {
            if let Some(done) = self.check_existing(handle, &dir.join(name), name, overwrite)? {
                return Ok(done);
            }
        }

        let response = self.fetcher.fetch(url)?.error_for_status(url)?;

        let name = match filename {
            Some(name) => name,
            None => {
                let name = response
                    .content_disposition
                    .as_deref()
                    .and_then(classify::filename_from_content_disposition)
                    .unwrap_or_else(|| classify::generated_filename(url, response.content_type.as_deref()));
                if let Some(done) = self.check_existing(handle, &dir.join(&name), &name, overwrite)? {
                    return Ok(done);
                }
                name
            }
        };

        let path = dir.join(&name);
        handle.update(|s| {
            s.filename = Some(name.clone());
            s.destination = Some(path.clone());
        });

        let size = self.stream_to(handle, response, &path)?;
        handle.complete(&path);
        Ok(Finished {
            path,
            size: Some(size),
            skipped: false,
            message: "Download completed successfully".to_string(),
        })
    }

    /// Skip when `path` exists and overwriting is off.
    fn check_existing(
        &self,
        handle: &TransferHandle,
        path: &Path,
        name: &str,
        overwrite: bool,
    ) -> Result<Option<Finished>> {
        if !path.exists() {
            return Ok(None);
        }
        if overwrite {
            tracing::warn!("File exists, will overwrite: {}", path.display());
            return Ok(None);
        }

        let size = fs::metadata(path).map_err(|e| HmtError::fs(path, e))?.len();
        handle.update(|s| {
            s.filename = Some(name.to_string());
            s.downloaded = size;
            s.total_size = Some(size);
            s.skipped = true;
        });
        handle.complete(path);
        Ok(Some(Finished {
            path: path.to_path_buf(),
            size: Some(size),
            skipped: true,
            message: "File already exists, skipped download".to_string(),
        }))
    }

    /// Fetch a repository branch archive and unpack it into `dir`.
    fn download_repository(
        &self,
        handle: &TransferHandle,
        target: &GitHubTarget,
        dir: &Path,
        overwrite: bool,
        extract: bool,
    ) -> Result<Finished> {
        let repo = target.repo();
        tracing::info!("Detected GitHub repository: {}/{}", target.owner(), repo);
        fs::create_dir_all(dir).map_err(|e| HmtError::fs(dir, e))?;

        if extract {
            let candidates = [format!("{}-main", repo), format!("{}-master", repo), repo.to_string()];
            if let Some(existing) = candidates.iter().map(|c| dir.join(c)).find(|p| p.is_dir()) {
                if !overwrite {
                    handle.update(|s| {
                        s.filename = Some(target.filename());
                        s.skipped = true;
                    });
                    handle.complete(&existing);
                    return Ok(Finished {
                        path: existing,
                        size: None,
                        skipped: true,
                        message: "Repository folder already exists, skipped download".to_string(),
                    });
                }
                tracing::warn!("Repository folder exists, extracting over it: {}", existing.display());
            }
        }

        let zip_path = dir.join(target.filename());
        handle.update(|s| {
            s.filename = Some(target.filename());
            s.destination = Some(zip_path.clone());
        });

        let mut last_error = None;
        for (branch, url) in target.archive_urls() {
            let response = self.fetcher.fetch(&url)?;
            if response.status == 404 {
                tracing::debug!("No '{}' branch archive at {}", branch, url);
                last_error = Some(HmtError::Network(format!("HTTP 404 for {}", url)));
                continue;
            }
            let response = response.error_for_status(&url)?;
            let size = self.stream_to(handle, response, &zip_path)?;

            if !extract {
                handle.complete(&zip_path);
                return Ok(Finished {
                    path: zip_path,
                    size: Some(size),
                    skipped: false,
                    message: "Repository archive downloaded".to_string(),
                });
            }

            handle.set_status(TransferStatus::Extracting);
            tracing::info!("Extracting repository archive...");
            let root = archive::single_root_dir(&zip_path)?;
            archive::extract(&zip_path, dir, true)?;

            let extracted = root.map(|r| dir.join(r)).filter(|p| p.is_dir()).unwrap_or_else(|| dir.to_path_buf());
            handle.complete(&extracted);
            return Ok(Finished {
                path: extracted,
                size: Some(size),
                skipped: false,
                message: format!("Repository downloaded and extracted successfully ({} branch)", branch),
            });
        }

        Err(last_error.unwrap_or_else(|| HmtError::Network(format!("no branch archive found for {}", repo))))
    }

    /// Stream `response` into `<path>.part`, then rename over `path`.
    /// Returns the number of bytes written.
    fn stream_to(&self, handle: &TransferHandle, response: FetchResponse, path: &Path) -> Result<u64> {
        let total = response.content_length;
        handle.update(|s| {
            s.total_size = total;
            s.destination = Some(path.to_path_buf());
        });
        match total {
            Some(total) => tracing::info!("File size: {}", format_size(total)),
            None => tracing::info!("File size unknown"),
        }

        let part = part_path(path);
        let file = File::create(&part).map_err(|e| HmtError::fs(&part, e))?;
        let mut writer = BufWriter::new(file);
        let mut body = response.body;
        let mut buf = vec![0u8; self.chunk_size];
        let mut downloaded: u64 = 0;
        let mut last_logged: Option<u8> = None;

        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(HmtError::Network(format!(
                        "connection lost after {}: {}",
                        format_size(downloaded),
                        e
                    )))
                }
            };
            writer.write_all(&buf[..n]).map_err(|e| HmtError::fs(&part, e))?;
            downloaded += n as u64;

            let pct = handle.record_progress(downloaded, total);
            if total.is_some() {
                let decile = pct / 10 * 10;
                if last_logged.map_or(decile > 0, |l| decile > l) {
                    tracing::info!("Progress: {}% ({})", decile, handle.snapshot().size_string());
                    last_logged = Some(decile);
                }
            }
        }

        writer.flush().map_err(|e| HmtError::fs(&part, e))?;
        drop(writer);

        if let Some(total) = total {
            if downloaded < total {
                return Err(HmtError::Network(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        fs::rename(&part, path).map_err(|e| HmtError::fs(path, e))?;
        Ok(downloaded)
    }
}

/// `<path>.part`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
