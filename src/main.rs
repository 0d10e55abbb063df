// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use hmt_suite::config::{absolutize, Config};
use hmt_suite::discovery;
use hmt_suite::error::ErrorBuilder;
use hmt_suite::installer::Installer;
use hmt_suite::nodes::{models_subfolder, ModelDownloaderNode};
use hmt_suite::platform::PlatformChoice;
use hmt_suite::server::Server;
use hmt_suite::transfer::{
    format_size, DownloadKind, ProgressRegistry, TransferEngine, TransferOutcome, TransferRequest,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a tracing filter, e.g. `HMT_LOG=hmt_suite=debug`.
const LOG_ENV_VAR: &str = "HMT_LOG";

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error
    pub const ERROR: i32 = 1;
    /// Invalid input data (bad URL, bad folder)
    pub const DATA_ERR: i32 = 65;
    /// Network or file operation failed
    pub const IO_ERR: i32 = 74;
    /// Missing tool or interpreter
    pub const CONFIG: i32 = 78;

    pub fn for_kind(kind: Option<&str>) -> i32 {
        match kind {
            Some("invalid_url") => DATA_ERR,
            Some("network") | Some("filesystem") => IO_ERR,
            Some("environment") => CONFIG,
            _ => ERROR,
        }
    }
}

/// Spinner helpers for consistent progress indicators
mod spinner {
    use colored::Colorize;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(message: &str, quiet: bool) -> ProgressBar {
        if quiet {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    /// Percentage bar driven by polling the progress registry.
    pub fn create_bar(quiet: bool) -> ProgressBar {
        if quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn finish_success(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("{} {}", "[OK]".green(), message);
    }

    pub fn finish_warning(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("{} {}", "[!]".yellow(), message);
    }

    pub fn finish_error(spinner: &ProgressBar) {
        spinner.finish_and_clear();
    }
}

/// hmt - Model downloader and custom node installer.
#[derive(Parser)]
#[command(name = "hmt")]
#[command(version = VERSION)]
#[command(about = "Download models and install custom nodes for a ComfyUI-style host.")]
#[command(long_about = "hmt - Model downloader and custom node installer\n\n\
    Download a model:    hmt download <URL> --folder loras\n\
    Fetch a repository:  hmt download https://github.com/owner/repo --type github\n\
    Install a node:      hmt install https://github.com/owner/node\n\
    List models:         hmt models\n\
    Progress API:        hmt serve\n\
    Configure:           hmt config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Host root holding models/ and custom_nodes/ (overrides config and HMT_COMFYUI_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Quiet mode: errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a model file or GitHub repository into models/
    ///
    /// Examples:
    ///   hmt download https://huggingface.co/org/repo/resolve/main/model.safetensors
    ///   hmt download https://example.com/file?id=3 --folder vae --filename vae.pt
    ///   hmt download https://github.com/owner/repo --type github --folder repos
    #[command(alias = "d")]
    Download {
        /// URL to download
        url: String,

        /// Folder under models/
        #[arg(short, long, default_value = ModelDownloaderNode::DEFAULT_FOLDER)]
        folder: String,

        /// Save under this name instead of the derived one
        #[arg(short = 'n', long)]
        filename: Option<String>,

        /// Replace an existing file or folder
        #[arg(long)]
        overwrite: bool,

        /// file or github
        #[arg(short = 't', long = "type", default_value = "file")]
        kind: DownloadKind,

        /// Keep repository archives zipped
        #[arg(long)]
        no_extract: bool,
    },

    /// Install a custom node package into custom_nodes/
    ///
    /// Examples:
    ///   hmt install https://github.com/owner/ComfyUI-Node
    ///   hmt install https://example.com/node.zip --platform windows
    #[command(alias = "i")]
    Install {
        /// Git repository or .zip URL
        url: String,

        /// auto, windows or linux
        #[arg(short, long, default_value = "auto")]
        platform: PlatformChoice,
    },

    /// List installed model files by category
    #[command(alias = "m")]
    Models,

    /// List installed custom nodes
    Nodes,

    /// Start the progress API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set the host root directory
    SetRoot {
        /// Directory holding models/ and custom_nodes/
        path: PathBuf,
    },
    /// Set the Python interpreter used for node requirements
    SetPython {
        /// Path to a python executable
        path: PathBuf,
    },
}

fn init_logging(verbose: bool, quiet: bool, default_directive: &str) {
    let fallback = if verbose {
        "hmt_suite=debug,hmt=debug"
    } else if quiet {
        "error"
    } else {
        default_directive
    };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The server has no progress bars, so its info lines are the output.
    let default_directive = match cli.command {
        Commands::Serve { .. } => "hmt_suite=info",
        _ => "warn",
    };
    init_logging(cli.verbose, cli.quiet, default_directive);

    let mut config = Config::load()?;
    config.root_override = cli.root.as_deref().map(absolutize);

    let code = match cli.command {
        Commands::Download {
            url,
            folder,
            filename,
            overwrite,
            kind,
            no_extract,
        } => {
            let request = build_request(&config, url, &folder, filename, overwrite, kind, !no_extract)?;
            handle_download(&config, request, cli.quiet)?
        }
        Commands::Install { url, platform } => handle_install(&config, &url, platform, cli.quiet)?,
        Commands::Models => {
            list_models(&config)?;
            0
        }
        Commands::Nodes => {
            list_nodes(&config)?;
            0
        }
        Commands::Serve { port, bind } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(serve(&config, port, bind))?;
            0
        }
        Commands::Config { command } => {
            handle_config(config, command.unwrap_or(ConfigCommands::Show))?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_request(
    config: &Config,
    url: String,
    folder: &str,
    filename: Option<String>,
    overwrite: bool,
    kind: DownloadKind,
    extract: bool,
) -> Result<TransferRequest> {
    let Some(folder) = models_subfolder(folder) else {
        anyhow::bail!(
            "{}",
            ErrorBuilder::new(format!("Invalid destination folder: {}", folder))
                .cause("The folder is absolute or contains '..'")
                .fix("Use a folder name under models/, e.g. --folder loras")
                .build()
        );
    };
    let mut request = TransferRequest {
        url: url.trim().to_string(),
        destination: config.models_dir().join(folder),
        filename: None,
        overwrite,
        kind,
        extract,
    };
    if let Some(filename) = filename {
        request = request.with_filename(filename);
    }
    Ok(request)
}

/// Run the transfer on a worker thread and drive a progress bar from the
/// registry until it finishes.
fn handle_download(config: &Config, request: TransferRequest, quiet: bool) -> Result<i32> {
    let registry = Arc::new(ProgressRegistry::new());
    let engine = Arc::new(TransferEngine::new(config, Arc::clone(&registry))?);

    if !quiet {
        println!("{} {}", "[↓]".yellow(), request.url);
        println!("    {}", format!("-> {}", request.destination.display()).dimmed());
    }

    let handle = engine.prepare(&request);
    let id = handle.id().clone();
    let worker = {
        let engine = Arc::clone(&engine);
        let request = request.clone();
        thread::spawn(move || engine.run(handle, &request))
    };

    let pb = spinner::create_bar(quiet);
    while !worker.is_finished() {
        if let Some(state) = registry.get(&id) {
            pb.set_position(u64::from(state.percentage));
            pb.set_message(format!("{} {}", state.status, state.size_string()));
        }
        thread::sleep(Duration::from_millis(100));
    }
    let outcome = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Download worker panicked"))?;

    Ok(report_download(&pb, &outcome))
}

fn report_download(pb: &indicatif::ProgressBar, outcome: &TransferOutcome) -> i32 {
    let path = outcome
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    if outcome.success && outcome.skipped {
        spinner::finish_warning(pb, &format!("{}: {}", outcome.message, path));
        0
    } else if outcome.success {
        let size = outcome.file_size.map(format_size).unwrap_or_default();
        spinner::finish_success(pb, &format!("{} {}", path, size.dimmed()));
        0
    } else {
        spinner::finish_error(pb);
        let kind = outcome.error_kind.unwrap_or("");
        eprintln!("{}", ErrorBuilder::for_kind(&outcome.message, kind).build().red());
        exit_codes::for_kind(outcome.error_kind)
    }
}

fn handle_install(config: &Config, url: &str, platform: PlatformChoice, quiet: bool) -> Result<i32> {
    let engine = Arc::new(TransferEngine::new(config, Arc::new(ProgressRegistry::new()))?);
    let installer = Installer::new(config, engine);

    let sp = spinner::create(&format!("Installing {}...", url), quiet);
    let result = installer.install(url, platform);
    let path = result
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    if !result.is_success() {
        spinner::finish_error(&sp);
        eprintln!(
            "{}",
            ErrorBuilder::new(&result.message)
                .cause("git is not installed, or the repository is private")
                .cause("The archive URL is unreachable or not a zip")
                .fix("Check the URL in a browser, then retry with -v for details")
                .build()
                .red()
        );
        return Ok(exit_codes::ERROR);
    }

    if result.skipped {
        spinner::finish_warning(&sp, &format!("{} ({})", result.message, path));
    } else {
        spinner::finish_success(&sp, &format!("{} ({})", result.message, path));
    }
    for warning in &result.warnings {
        println!("    {} {}", "[!]".yellow(), warning);
    }
    if !result.skipped && !quiet {
        println!("    Restart the host to load the new node.");
    }
    Ok(0)
}

fn list_models(config: &Config) -> Result<()> {
    let models_dir = config.models_dir();
    let models = discovery::list_models(&models_dir)?;

    println!();
    println!("{} {}", "Models in".bold(), models_dir.display());
    if models.is_empty() {
        println!("  {}", "No model folders found".dimmed());
        return Ok(());
    }
    for (category, files) in &models {
        println!();
        println!("  {} {}", category.cyan().bold(), format!("({})", files.len()).dimmed());
        for file in files {
            println!("    {}", file);
        }
    }
    println!();
    Ok(())
}

fn list_nodes(config: &Config) -> Result<()> {
    let dir = config.custom_nodes_dir();
    let nodes = discovery::list_custom_nodes(&dir)?;

    println!();
    println!("{} {} {}", "Custom nodes in".bold(), dir.display(), format!("({})", nodes.total).dimmed());
    for name in &nodes.installed_packages {
        println!("  {} {}", "[✓]".green(), name);
    }
    println!();
    Ok(())
}

async fn serve(config: &Config, port: Option<u16>, bind: String) -> Result<()> {
    let engine = Arc::new(TransferEngine::new(config, Arc::new(ProgressRegistry::new()))?);
    let server = Server::new(config, engine)
        .with_port(port.unwrap_or(config.port))
        .with_bind_address(bind);

    println!("{} Progress API on port {}", "[✓]".green(), server.port());
    println!("    Root: {}", config.root().display());
    server.start().await
}

fn handle_config(mut config: Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!();
            println!("{}", "Configuration".bold());
            println!("  File:            {}", Config::config_path().display());
            println!("  Root:            {}", config.root().display());
            println!("  Models:          {}", config.models_dir().display());
            println!("  Custom nodes:    {}", config.custom_nodes_dir().display());
            let python = config
                .python_executable
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "auto".to_string());
            println!("  Python:          {}", python);
            println!("  Chunk size:      {}", format_size(config.chunk_size as u64));
            println!(
                "  Timeouts:        connect {}s, read {}s, clone {}s, scripts {}s",
                config.connect_timeout_secs,
                config.read_timeout_secs,
                config.clone_timeout_secs,
                config.script_timeout_secs
            );
            println!("  Port:            {}", config.port);
            println!();
        }
        ConfigCommands::SetRoot { path } => {
            let path = absolutize(&path);
            if !path.is_dir() {
                println!("{} {} does not exist yet", "[!]".yellow(), path.display());
            }
            config.comfyui_root = Some(path.clone());
            config.save()?;
            println!("{} Root set to {}", "[✓]".green(), path.display());
        }
        ConfigCommands::SetPython { path } => {
            let path = absolutize(&path);
            if !path.is_file() {
                println!("{} {} is not a file", "[!]".yellow(), path.display());
            }
            config.python_executable = Some(path.clone());
            config.save()?;
            println!("{} Python set to {}", "[✓]".green(), path.display());
        }
    }
    Ok(())
}
