// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP fetch seam.
//!
//! The engine only needs headers followed by a readable body. Tests plug in
//! an in-memory [`Fetcher`]; production uses [`HttpFetcher`].

use std::io::Read;

use reqwest::header::{HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};

use crate::config::Config;
use crate::error::{HmtError, Result};

/// Headers and streaming body of one GET.
pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into a network error.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HmtError::Network(format!("HTTP {} for {}", self.status, url)))
        }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("content_disposition", &self.content_disposition)
            .finish_non_exhaustive()
    }
}

/// Performs a GET and returns once headers are available.
///
/// Non-2xx statuses are returned, not raised; the caller decides (a 404 on a
/// `main` archive means "try `master`").
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// Blocking reqwest client with connect and per-read timeouts.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let response = self.client.get(url).send()?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);

        Ok(FetchResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            content_type,
            content_disposition,
            body: Box::new(response),
        })
    }
}
