// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Custom node installation.
//!
//! `classify -> acquire -> setup script -> requirements -> result`
//!
//! Only classification and acquisition can fail an install. Setup scripts
//! and dependency installs are best-effort: their problems become warnings
//! on an otherwise successful [`InstallResult`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::archive;
use crate::classify::{self, sanitize_filename};
use crate::config::Config;
use crate::error::{HmtError, Result};
use crate::platform::{PlatformChoice, PlatformResolver, ResolvedPlatform, TargetPlatform};
use crate::process::{CommandRunner, CommandSpec, RunError, SystemRunner};
use crate::transfer::{TransferEngine, TransferRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Success,
    Error,
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one installation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    pub status: InstallStatus,
    pub path: Option<PathBuf>,
    pub message: String,
    /// Problems from best-effort steps.
    pub warnings: Vec<String>,
    /// The node was already present; nothing was done.
    pub skipped: bool,
}

impl InstallResult {
    fn success(path: PathBuf, message: String, warnings: Vec<String>) -> Self {
        Self {
            status: InstallStatus::Success,
            path: Some(path),
            message,
            warnings,
            skipped: false,
        }
    }

    fn already_installed(path: PathBuf, name: &str) -> Self {
        Self {
            status: InstallStatus::Success,
            path: Some(path),
            message: format!("Custom node '{}' is already installed", name),
            warnings: Vec::new(),
            skipped: true,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: InstallStatus::Error,
            path: None,
            message: message.into(),
            warnings: Vec::new(),
            skipped: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == InstallStatus::Success
    }
}

/// Result of a best-effort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ran(String),
    Skipped(String),
    Warning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Git,
    Zip,
}

/// Where a node comes from and the folder name it installs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallSource {
    pub kind: SourceKind,
    pub url: String,
    pub name: String,
}

/// Classify `url` as a git repository or a ZIP archive and derive the node
/// folder name.
///
/// ZIP registry URLs look like `https://cdn.comfy.org/city96/ComfyUI-GGUF/1.1.10/node.zip`,
/// so the first folder segment mentioning `comfyui` names the node; otherwise
/// the archive stem does.
pub fn identify_source(url: &str) -> Result<InstallSource> {
    classify::classify(url)?;
    let parsed = classify::parse_absolute(url)?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let last = segments.last().copied().unwrap_or_default();

    let (kind, raw_name) = if last.to_ascii_lowercase().ends_with(".zip") {
        let name = segments[..segments.len() - 1]
            .iter()
            .find(|seg| seg.to_ascii_lowercase().contains("comfyui"))
            .map(|seg| seg.to_string())
            .unwrap_or_else(|| last[..last.len() - 4].to_string());
        (SourceKind::Zip, name)
    } else {
        let name = last.strip_suffix(".git").unwrap_or(last).to_string();
        (SourceKind::Git, name)
    };

    let name = sanitize_filename(&raw_name)
        .ok_or_else(|| HmtError::invalid_url(url, "cannot derive a custom node name from the URL"))?;

    Ok(InstallSource {
        kind,
        url: url.trim().to_string(),
        name,
    })
}

/// Installs custom nodes under `<root>/custom_nodes`.
pub struct Installer {
    root: PathBuf,
    custom_nodes_dir: PathBuf,
    engine: Arc<TransferEngine>,
    runner: Arc<dyn CommandRunner>,
    resolver: PlatformResolver,
    clone_timeout: Duration,
    script_timeout: Duration,
}

impl Installer {
    pub fn new(config: &Config, engine: Arc<TransferEngine>) -> Self {
        let root = config.root();
        Self {
            custom_nodes_dir: root.join("custom_nodes"),
            resolver: PlatformResolver::new(&root).with_python_override(config.python_executable.clone()),
            root,
            engine,
            runner: Arc::new(SystemRunner),
            clone_timeout: config.clone_timeout(),
            script_timeout: config.script_timeout(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_resolver(mut self, resolver: PlatformResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn custom_nodes_dir(&self) -> &Path {
        &self.custom_nodes_dir
    }

    /// Install the node at `url`. Never panics; every failure is folded into
    /// the returned result.
    pub fn install(&self, url: &str, choice: PlatformChoice) -> InstallResult {
        tracing::info!("Installing custom node from {}", url);

        let source = match identify_source(url) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("{}", e);
                return InstallResult::error(e.to_string());
            }
        };
        let dest = self.custom_nodes_dir.join(&source.name);

        if dest.exists() {
            tracing::info!("Custom node already installed: {}", dest.display());
            return InstallResult::already_installed(dest, &source.name);
        }

        if let Err(e) = self.acquire(&source, &dest) {
            tracing::error!("Installation of '{}' failed: {}", source.name, e);
            if dest.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&dest) {
                    tracing::warn!("Could not remove partial install {}: {}", dest.display(), cleanup);
                }
            }
            return InstallResult::error(format!("Installation failed: {}", e));
        }

        let resolved = self.resolver.resolve(choice);
        let mut warnings = Vec::new();
        for step in [
            self.run_setup_script(&dest, &resolved),
            self.install_requirements(&dest, &resolved),
        ] {
            match step {
                StepOutcome::Ran(msg) => tracing::info!("{}", msg),
                StepOutcome::Skipped(msg) => tracing::info!("{}", msg),
                StepOutcome::Warning(msg) => {
                    tracing::warn!("{}", msg);
                    warnings.push(msg);
                }
            }
        }

        tracing::info!("Custom node '{}' installed; restart ComfyUI to load it", source.name);
        InstallResult::success(
            dest,
            format!(
                "Custom node '{}' installed successfully. Please restart ComfyUI.",
                source.name
            ),
            warnings,
        )
    }

    fn acquire(&self, source: &InstallSource, dest: &Path) -> Result<()> {
        fs::create_dir_all(&self.custom_nodes_dir).map_err(|e| HmtError::fs(&self.custom_nodes_dir, e))?;
        match source.kind {
            SourceKind::Git => self.clone_repository(&source.url, dest),
            SourceKind::Zip => self.download_zip(&source.url, dest),
        }
    }

    fn clone_repository(&self, url: &str, dest: &Path) -> Result<()> {
        let spec = CommandSpec::new("git")
            .arg("clone")
            .arg(url)
            .arg(dest)
            .current_dir(&self.custom_nodes_dir)
            .timeout(self.clone_timeout);
        tracing::info!("Running: {}", spec);

        match self.runner.run(&spec) {
            Ok(out) if out.success() => {
                tracing::info!("Repository cloned successfully");
                Ok(())
            }
            Ok(out) => Err(HmtError::Clone(format!("git clone failed: {}", out.summary()))),
            Err(RunError::NotFound(_)) => Err(HmtError::Clone("git is not installed or not in PATH".to_string())),
            Err(e) => Err(HmtError::Clone(e.to_string())),
        }
    }

    fn download_zip(&self, url: &str, dest: &Path) -> Result<()> {
        let zip_name = classify::parse_absolute(url)
            .ok()
            .and_then(|u| classify::filename_from_url(&u))
            .unwrap_or_else(|| "node.zip".to_string());
        let request = TransferRequest::file(url, &self.custom_nodes_dir)
            .with_filename(zip_name)
            .with_overwrite(true);

        let outcome = self.engine.transfer(&request)?;
        let zip_path = outcome
            .file_path
            .ok_or_else(|| HmtError::Extraction("download produced no archive".to_string()))?;

        if let Err(e) = archive::extract(&zip_path, dest, true) {
            if let Err(rm) = fs::remove_file(&zip_path) {
                tracing::debug!("Could not remove {}: {}", zip_path.display(), rm);
            }
            return Err(e);
        }
        tracing::info!("Extraction completed: {}", dest.display());
        Ok(())
    }

    /// `install.py`, then `install.<ext>`, then `setup.<ext>`.
    fn run_setup_script(&self, dest: &Path, resolved: &ResolvedPlatform) -> StepOutcome {
        let install_py = dest.join("install.py");
        if install_py.is_file() {
            let python = match resolved.require_interpreter() {
                Ok(python) => python,
                Err(e) => return StepOutcome::Warning(format!("install.py was not run: {}", e)),
            };
            let spec = CommandSpec::new(python)
                .arg("-s")
                .arg(&install_py)
                .current_dir(dest)
                .timeout(self.script_timeout);
            return self.run_step("install.py", &spec);
        }

        for stem in ["install", "setup"] {
            let script = dest.join(format!("{}.{}", stem, resolved.script_extension));
            if script.is_file() {
                let label = format!("{}.{}", stem, resolved.script_extension);
                let spec = script_command(&script, resolved.platform)
                    .current_dir(dest)
                    .timeout(self.script_timeout);
                return self.run_step(&label, &spec);
            }
        }

        StepOutcome::Skipped("No setup script found".to_string())
    }

    fn install_requirements(&self, dest: &Path, resolved: &ResolvedPlatform) -> StepOutcome {
        let requirements = dest.join("requirements.txt");
        if !requirements.is_file() {
            return StepOutcome::Skipped("No requirements.txt found, skipping dependency installation".to_string());
        }
        let python = match resolved.require_interpreter() {
            Ok(python) => python,
            Err(e) => return StepOutcome::Warning(format!("Requirements were not installed: {}", e)),
        };
        let spec = CommandSpec::new(python)
            .args(["-s", "-m", "pip", "install", "-r"])
            .arg(&requirements)
            .current_dir(&self.root)
            .timeout(self.script_timeout);
        self.run_step("requirements install", &spec)
    }

    fn run_step(&self, label: &str, spec: &CommandSpec) -> StepOutcome {
        tracing::info!("Running: {}", spec);
        match self.runner.run(spec) {
            Ok(out) if out.success() => StepOutcome::Ran(format!("{} completed", label)),
            Ok(out) => StepOutcome::Warning(format!("{} had errors: {}", label, out.summary())),
            Err(e) => StepOutcome::Warning(format!("{} could not run: {}", label, e)),
        }
    }
}

fn script_command(script: &Path, platform: TargetPlatform) -> CommandSpec {
    match platform {
        TargetPlatform::Windows => CommandSpec::new("cmd").arg("/C").arg(script),
        TargetPlatform::Linux => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(script, fs::Permissions::from_mode(0o755)) {
                    tracing::debug!("Could not chmod {}: {}", script.display(), e);
                }
            }
            CommandSpec::new("bash").arg(script)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::transfer::{FetchResponse, Fetcher, ProgressRegistry};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records commands; `git clone` creates the destination with `files`.
    struct FakeRunner {
        calls: Mutex<Vec<CommandSpec>>,
        files: Vec<(&'static str, &'static str)>,
        exit_code: i32,
    }

    impl FakeRunner {
        fn new(files: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                files,
                exit_code: 0,
            }
        }

        fn programs(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.program_name()).collect()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, RunError> {
            self.calls.lock().unwrap().push(spec.clone());
            if spec.program == "git" {
                if self.exit_code != 0 {
                    let dest = PathBuf::from(spec.args.last().unwrap());
                    fs::create_dir_all(&dest).unwrap();
                    return Ok(CommandOutput {
                        code: Some(self.exit_code),
                        stdout: String::new(),
                        stderr: "fatal: repository not found".to_string(),
                    });
                }
                let dest = PathBuf::from(spec.args.last().unwrap());
                fs::create_dir_all(&dest).unwrap();
                for (name, body) in &self.files {
                    fs::write(dest.join(name), body).unwrap();
                }
            }
            Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn fetch(&self, url: &str) -> Result<FetchResponse> {
            Err(HmtError::Network(format!("offline: {}", url)))
        }
    }

    fn installer(root: &Path, runner: Arc<FakeRunner>, python: bool) -> Installer {
        let engine = Arc::new(TransferEngine::with_fetcher(
            Arc::new(NoNetwork),
            Arc::new(ProgressRegistry::new()),
            1024,
        ));
        let config = Config::default();
        let lookup = move || python.then(|| PathBuf::from("/usr/bin/python3"));
        Installer {
            root: root.to_path_buf(),
            custom_nodes_dir: root.join("custom_nodes"),
            engine,
            runner,
            resolver: PlatformResolver::new(root).with_path_lookup(lookup),
            clone_timeout: config.clone_timeout(),
            script_timeout: config.script_timeout(),
        }
    }

    #[test]
    fn test_identify_git_source() {
        let src = identify_source("https://github.com/city96/ComfyUI-GGUF.git").unwrap();
        assert_eq!(src.kind, SourceKind::Git);
        assert_eq!(src.name, "ComfyUI-GGUF");

        let src = identify_source("https://github.com/ltdrdata/ComfyUI-Manager/").unwrap();
        assert_eq!(src.name, "ComfyUI-Manager");
    }

    #[test]
    fn test_identify_zip_source() {
        let src = identify_source("https://cdn.comfy.org/city96/ComfyUI-GGUF/1.1.10/node.zip").unwrap();
        assert_eq!(src.kind, SourceKind::Zip);
        assert_eq!(src.name, "ComfyUI-GGUF");

        let src = identify_source("https://example.com/downloads/my-nodes.ZIP").unwrap();
        assert_eq!(src.kind, SourceKind::Zip);
        assert_eq!(src.name, "my-nodes");
    }

    #[test]
    fn test_identify_invalid() {
        assert_eq!(identify_source("not a url").unwrap_err().kind(), "invalid_url");
        assert_eq!(identify_source("https://example.com/").unwrap_err().kind(), "invalid_url");
    }

    #[test]
    fn test_clone_then_scripts_then_requirements() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![
            ("install.sh", "echo hi"),
            ("setup.sh", "echo unused"),
            ("requirements.txt", "numpy"),
        ]));
        let installer = installer(dir.path(), runner.clone(), true);

        let result = installer.install("https://github.com/o/ComfyUI-Thing", PlatformChoice::Linux);
        assert!(result.is_success(), "{}", result.message);
        assert!(result.warnings.is_empty());
        assert_eq!(result.path, Some(dir.path().join("custom_nodes").join("ComfyUI-Thing")));
        assert_eq!(runner.programs(), vec!["git", "bash", "python3"]);

        let calls = runner.calls.lock().unwrap();
        assert!(calls[1].args[0].to_string_lossy().ends_with("install.sh"));
        let pip: Vec<String> = calls[2].args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(&pip[..5], &["-s", "-m", "pip", "install", "-r"]);
        assert_eq!(calls[2].cwd.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_install_py_takes_priority() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![("install.py", "print()"), ("install.bat", "echo")]));
        let installer = installer(dir.path(), runner.clone(), true);

        let result = installer.install("https://github.com/o/pkg", PlatformChoice::Windows);
        assert!(result.is_success());
        assert_eq!(runner.programs(), vec!["git", "python3"]);
    }

    #[test]
    fn test_windows_uses_bat_scripts() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![("setup.bat", "echo"), ("install.sh", "echo")]));
        let installer = installer(dir.path(), runner.clone(), false);

        let result = installer.install("https://github.com/o/pkg", PlatformChoice::Windows);
        assert!(result.is_success());
        assert_eq!(runner.programs(), vec!["git", "cmd"]);
    }

    #[test]
    fn test_second_install_is_already_installed() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![]));
        let installer = installer(dir.path(), runner.clone(), false);

        let first = installer.install("https://github.com/o/repo", PlatformChoice::Linux);
        assert!(first.is_success());
        let second = installer.install("https://github.com/o/repo", PlatformChoice::Linux);
        assert!(second.is_success());
        assert!(second.skipped);
        assert!(second.message.contains("already installed"));
        assert_eq!(runner.programs(), vec!["git"]);
    }

    #[test]
    fn test_missing_python_is_warning_not_failure() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![("requirements.txt", "torch")]));
        let installer = installer(dir.path(), runner.clone(), false);

        let result = installer.install("https://github.com/o/needs-deps", PlatformChoice::Linux);
        assert!(result.is_success());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Python"));
    }

    #[test]
    fn test_clone_failure_cleans_up() {
        let dir = TempDir::new().unwrap();
        let mut runner = FakeRunner::new(vec![]);
        runner.exit_code = 128;
        let installer = installer(dir.path(), Arc::new(runner), false);

        let result = installer.install("https://github.com/o/private-repo", PlatformChoice::Linux);
        assert_eq!(result.status, InstallStatus::Error);
        assert!(result.message.contains("repository not found"));
        assert!(!dir.path().join("custom_nodes").join("private-repo").exists());
    }

    #[test]
    fn test_zip_download_failure_is_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![]));
        let installer = installer(dir.path(), runner.clone(), false);

        let result = installer.install("https://cdn.comfy.org/o/ComfyUI-X/1.0/node.zip", PlatformChoice::Linux);
        assert_eq!(result.status, InstallStatus::Error);
        assert!(result.message.contains("offline"));
        assert!(runner.programs().is_empty());
        assert!(!dir.path().join("custom_nodes").join("ComfyUI-X").exists());
    }

    #[test]
    fn test_invalid_url_is_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(vec![]));
        let result = installer(dir.path(), runner.clone(), false).install("not a url", PlatformChoice::Auto);
        assert_eq!(result.status, InstallStatus::Error);
        assert!(runner.programs().is_empty());
    }
}
