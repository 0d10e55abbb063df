// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Installer pipeline with a scripted command runner and a loopback HTTP host
//! for archive installs.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::{zip_bytes, Route, TestServer};
use hmt_suite::config::Config;
use hmt_suite::installer::{InstallStatus, Installer};
use hmt_suite::platform::{PlatformChoice, PlatformResolver};
use hmt_suite::process::{CommandOutput, CommandRunner, CommandSpec, RunError};
use hmt_suite::transfer::{ProgressRegistry, TransferEngine};
use tempfile::TempDir;

/// `git clone` creates the destination; every other command succeeds.
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    fn programs(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.program_name()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        self.calls.lock().unwrap().push(spec.clone());
        if spec.program == "git" {
            let dest = PathBuf::from(spec.args.last().unwrap());
            fs::create_dir_all(&dest).unwrap();
            fs::write(dest.join("__init__.py"), "").unwrap();
            fs::write(dest.join("requirements.txt"), "numpy").unwrap();
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn installer(root: &Path, runner: Arc<ScriptedRunner>) -> Installer {
    let mut config = Config::default();
    config.root_override = Some(root.to_path_buf());
    config.connect_timeout_secs = 5;
    config.read_timeout_secs = 10;
    let engine = Arc::new(TransferEngine::new(&config, Arc::new(ProgressRegistry::new())).unwrap());
    let python = root.join("python_embeded").join("python");
    fs::create_dir_all(python.parent().unwrap()).unwrap();
    fs::write(&python, "").unwrap();
    let resolver = PlatformResolver::new(root)
        .with_host_os("linux")
        .with_python_override(Some(python))
        .with_path_lookup(|| None);
    Installer::new(&config, engine)
        .with_runner(runner)
        .with_resolver(resolver)
}

#[test]
fn test_git_install_then_already_installed() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let installer = installer(dir.path(), runner.clone());
    let url = "https://github.com/someone/ComfyUI-Example.git";

    let first = installer.install(url, PlatformChoice::Auto);
    assert_eq!(first.status, InstallStatus::Success, "{}", first.message);
    assert!(!first.skipped);
    assert_eq!(first.path, Some(dir.path().join("custom_nodes").join("ComfyUI-Example")));
    assert_eq!(runner.programs(), vec!["git", "python"]);

    let second = installer.install(url, PlatformChoice::Auto);
    assert!(second.is_success());
    assert!(second.skipped);
    assert!(second.message.contains("already installed"));
    assert_eq!(runner.programs().len(), 2);
}

#[test]
fn test_zip_install_over_http() {
    let archive = zip_bytes(&[("nodes.py", "NODE_CLASS_MAPPINGS = {}"), ("setup.sh", "echo ok")]);
    let server = TestServer::start(vec![("/packs/ComfyUI-Zipped/1.0.0/node.zip", Route::ok(archive))]);
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let installer = installer(dir.path(), runner.clone());

    let result = installer.install(&server.url("/packs/ComfyUI-Zipped/1.0.0/node.zip"), PlatformChoice::Linux);
    assert!(result.is_success(), "{}", result.message);

    let dest = dir.path().join("custom_nodes").join("ComfyUI-Zipped");
    assert_eq!(result.path.as_deref(), Some(dest.as_path()));
    assert!(dest.join("nodes.py").is_file());
    assert!(!dir.path().join("custom_nodes").join("node.zip").exists());
    assert_eq!(runner.programs(), vec!["bash"]);
    assert_eq!(server.total_hits(), 1);
}

#[test]
fn test_zip_install_missing_archive_is_error() {
    let server = TestServer::start(vec![]);
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let installer = installer(dir.path(), runner.clone());

    let result = installer.install(&server.url("/gone/ComfyUI-Gone.zip"), PlatformChoice::Auto);
    assert_eq!(result.status, InstallStatus::Error);
    assert!(result.message.contains("404"), "{}", result.message);
    assert!(!dir.path().join("custom_nodes").join("ComfyUI-Gone").exists());
    assert!(runner.programs().is_empty());
}

#[test]
fn test_malicious_zip_is_rejected() {
    let archive = zip_bytes(&[("ok.py", ""), ("../../escape.sh", "rm -rf /")]);
    let server = TestServer::start(vec![("/evil.zip", Route::ok(archive))]);
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let installer = installer(dir.path(), runner.clone());

    let result = installer.install(&server.url("/evil.zip"), PlatformChoice::Auto);
    assert_eq!(result.status, InstallStatus::Error);
    assert!(!dir.path().join("escape.sh").exists());
    assert!(!dir.path().join("custom_nodes").join("evil").exists());
    assert!(runner.programs().is_empty());
}
