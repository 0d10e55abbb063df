// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Progress and discovery API.
//!
//! Lets a UI poll transfer progress while downloads run, start downloads
//! without blocking, and see what is already installed.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with transfer counts
//! - `GET /hmt/downloads` - Every transfer state
//! - `GET /hmt/downloads/:id` - One transfer state
//! - `POST /hmt/downloads` - Start a download, returns its id
//! - `GET /hmt/models/list` - Installed model files per category
//! - `GET /hmt/custom-nodes/list` - Installed custom node folders
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hmt_suite::config::Config;
//! use hmt_suite::server::Server;
//! use hmt_suite::transfer::{ProgressRegistry, TransferEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let engine = Arc::new(TransferEngine::new(&config, Arc::new(ProgressRegistry::new()))?);
//! Server::new(&config, engine).start().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;

use crate::classify;
use crate::config::Config;
use crate::discovery::{self, InstalledNodes};
use crate::nodes::{models_subfolder, ModelDownloaderNode};
use crate::transfer::{DownloadKind, StatusCounts, TransferEngine, TransferId, TransferRequest, TransferState};

// Maximum request body size (64KB)
const MAX_BODY_SIZE: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server state shared across handlers.
pub struct AppState {
    pub engine: Arc<TransferEngine>,
    pub models_dir: PathBuf,
    pub custom_nodes_dir: PathBuf,
    pub started: Instant,
}

/// API server configuration.
pub struct Server {
    port: u16,
    /// Address to bind to (defaults to 127.0.0.1).
    bind_address: String,
    state: Arc<AppState>,
}

impl Server {
    pub fn new(config: &Config, engine: Arc<TransferEngine>) -> Self {
        Self {
            port: config.port,
            bind_address: "127.0.0.1".to_string(),
            state: Arc::new(AppState {
                engine,
                models_dir: config.models_dir(),
                custom_nodes_dir: config.custom_nodes_dir(),
                started: Instant::now(),
            }),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        tracing::info!("Starting server on {}", addr);

        if self.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other server or pick another port with: hmt serve --port <PORT>",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

/// Router over `state`. Exposed for embedding and tests.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/hmt/downloads", get(list_downloads_handler).post(start_download_handler))
        .route("/hmt/downloads/:id", get(get_download_handler))
        .route("/hmt/models/list", get(models_handler))
        .route("/hmt/custom-nodes/list", get(custom_nodes_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    transfers: StatusCounts,
}

#[derive(Serialize)]
struct DownloadsResponse {
    downloads: HashMap<TransferId, TransferState>,
    total: usize,
}

/// Body of `POST /hmt/downloads`.
#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub url: String,
    #[serde(default)]
    pub destination_folder: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub download_type: DownloadKind,
    #[serde(default = "default_extract")]
    pub extract: bool,
}

fn default_extract() -> bool {
    true
}

#[derive(Serialize)]
struct StartDownloadResponse {
    id: TransferId,
    status: &'static str,
    destination: PathBuf,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: BTreeMap<String, Vec<String>>,
    categories: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
}

fn error_response(code: StatusCode, status: &'static str, message: impl Into<String>) -> Response {
    (
        code,
        Json(ErrorResponse {
            status,
            message: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        transfers: state.engine.registry().status_counts(),
    })
}

async fn list_downloads_handler(State(state): State<Arc<AppState>>) -> Json<DownloadsResponse> {
    let downloads = state.engine.registry().get_all();
    Json(DownloadsResponse {
        total: downloads.len(),
        downloads,
    })
}

async fn get_download_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.engine.registry().get(&TransferId::from(id)) {
        Some(transfer) => Json(transfer).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found", "Download ID not found"),
    }
}

/// Validates the request, registers a `pending` transfer and runs it on the
/// blocking pool. Responds before any byte is fetched.
async fn start_download_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartDownloadRequest>,
) -> Response {
    let url = body.url.trim().to_string();
    if url.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "error", "URL is required");
    }
    if let Err(e) = classify::classify(&url) {
        return error_response(StatusCode::BAD_REQUEST, "error", e.to_string());
    }
    let folder = body
        .destination_folder
        .as_deref()
        .unwrap_or(ModelDownloaderNode::DEFAULT_FOLDER);
    let Some(folder) = models_subfolder(folder) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "error",
            "Destination folder must be a path inside models/",
        );
    };

    let mut request = TransferRequest {
        url,
        destination: state.models_dir.join(folder),
        filename: None,
        overwrite: body.overwrite,
        kind: body.download_type,
        extract: body.extract,
    };
    if let Some(filename) = body.filename {
        request = request.with_filename(filename);
    }
    if let Err(e) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, "error", e.to_string());
    }

    let handle = state.engine.prepare(&request);
    let id = handle.id().clone();
    let destination = request.destination.clone();
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || {
        let outcome = engine.run(handle, &request);
        tracing::debug!("Transfer {} finished: {}", outcome.id, outcome.message);
    });

    (
        StatusCode::ACCEPTED,
        Json(StartDownloadResponse {
            id,
            status: "pending",
            destination,
        }),
    )
        .into_response()
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Response {
    match discovery::list_models(&state.models_dir) {
        Ok(models) => Json(ModelsResponse {
            categories: models.len(),
            models,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "error", e.to_string()),
    }
}

async fn custom_nodes_handler(State(state): State<Arc<AppState>>) -> Response {
    match discovery::list_custom_nodes(&state.custom_nodes_dir) {
        Ok(nodes) => Json::<InstalledNodes>(nodes).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "error", e.to_string()),
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                tracing::error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server; running transfers are abandoned");
}
