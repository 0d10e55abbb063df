// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! What is already installed under the host root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{HmtError, Result};

/// Installed custom node folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledNodes {
    pub installed_packages: Vec<String>,
    pub total: usize,
}

/// Model files per category folder under `models_dir`, sorted by name.
///
/// Only regular files directly inside each category count. Hidden category
/// folders are skipped. A missing models folder yields an empty map.
pub fn list_models(models_dir: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let mut result = BTreeMap::new();
    if !models_dir.is_dir() {
        tracing::debug!("Models directory not found: {}", models_dir.display());
        return Ok(result);
    }

    for entry in fs::read_dir(models_dir).map_err(|e| HmtError::fs(models_dir, e))? {
        let entry = entry.map_err(|e| HmtError::fs(models_dir, e))?;
        let category = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if category.starts_with('.') || !path.is_dir() {
            continue;
        }

        let mut files: Vec<String> = fs::read_dir(&path)
            .map_err(|e| HmtError::fs(&path, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| !name.ends_with(".part"))
            .collect();
        files.sort();
        result.insert(category, files);
    }

    tracing::debug!("Found {} model categories", result.len());
    Ok(result)
}

/// Top-level folders of `custom_nodes_dir`, skipping `__pycache__`-style and
/// hidden entries.
pub fn list_custom_nodes(custom_nodes_dir: &Path) -> Result<InstalledNodes> {
    if !custom_nodes_dir.is_dir() {
        return Ok(InstalledNodes::default());
    }

    let mut installed: Vec<String> = fs::read_dir(custom_nodes_dir)
        .map_err(|e| HmtError::fs(custom_nodes_dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with("__") && !name.starts_with('.'))
        .collect();
    installed.sort();

    Ok(InstalledNodes {
        total: installed.len(),
        installed_packages: installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_models_by_category() {
        let dir = TempDir::new().unwrap();
        let models = dir.path().join("models");
        fs::create_dir_all(models.join("checkpoints")).unwrap();
        fs::create_dir_all(models.join("loras").join("nested")).unwrap();
        fs::create_dir_all(models.join(".cache")).unwrap();
        fs::write(models.join("checkpoints").join("b.safetensors"), "").unwrap();
        fs::write(models.join("checkpoints").join("a.ckpt"), "").unwrap();
        fs::write(models.join("checkpoints").join("c.bin.part"), "").unwrap();
        fs::write(models.join("put_models_here.txt"), "").unwrap();

        let listed = list_models(&models).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed["checkpoints"], vec!["a.ckpt", "b.safetensors"]);
        assert!(listed["loras"].is_empty());
    }

    #[test]
    fn test_missing_dirs_are_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_models(&dir.path().join("models")).unwrap().is_empty());
        assert_eq!(list_custom_nodes(&dir.path().join("custom_nodes")).unwrap().total, 0);
    }

    #[test]
    fn test_list_custom_nodes() {
        let dir = TempDir::new().unwrap();
        let nodes = dir.path().join("custom_nodes");
        for name in ["ComfyUI-GGUF", "__pycache__", ".git", "ComfyUI-Manager"] {
            fs::create_dir_all(nodes.join(name)).unwrap();
        }
        fs::write(nodes.join("example_node.py.example"), "").unwrap();

        let listed = list_custom_nodes(&nodes).unwrap();
        assert_eq!(listed.installed_packages, vec!["ComfyUI-GGUF", "ComfyUI-Manager"]);
        assert_eq!(listed.total, 2);
    }
}
