//! In-memory record of initialized working directories.
//!
//! Advisory only: the tool's own `.terraform` directory is the source of
//! truth. Records are written by `init` and read by everything else.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// Workspace the tool uses when none is selected.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Backend assumed when no `backend` block is configured.
pub const LOCAL_BACKEND: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    /// Last init succeeded
    Active,
    /// Last init failed after an earlier success, or `.terraform` is gone
    Stale,
    /// Never initialized successfully in this process
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub name: String,
    pub path: PathBuf,
    pub backend: String,
    pub last_initialized: Option<DateTime<Utc>>,
    pub status: WorkspaceStatus,
}

/// Process-lifetime cache keyed by working directory.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceCache {
    records: Arc<RwLock<HashMap<PathBuf, WorkspaceRecord>>>,
}

impl WorkspaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an `init` in `dir`. Last writer wins.
    pub fn record_init(&self, dir: &Path, succeeded: bool) -> WorkspaceRecord {
        let name = current_workspace(dir);
        let backend = detect_backend(dir);
        let mut records = self.records.write();
        let previous = records.get(dir);

        let record = if succeeded {
            WorkspaceRecord {
                name,
                path: dir.to_path_buf(),
                backend,
                last_initialized: Some(Utc::now()),
                status: WorkspaceStatus::Active,
            }
        } else {
            let last_initialized = previous.and_then(|r| r.last_initialized);
            WorkspaceRecord {
                name,
                path: dir.to_path_buf(),
                backend,
                last_initialized,
                status: if last_initialized.is_some() {
                    WorkspaceStatus::Stale
                } else {
                    WorkspaceStatus::Unknown
                },
            }
        };

        debug!(
            workspace = %record.name,
            backend = %record.backend,
            status = ?record.status,
            "Recorded init for {}",
            dir.display()
        );
        records.insert(dir.to_path_buf(), record.clone());
        record
    }

    /// Current record for `dir`, marked stale if `.terraform` has vanished.
    pub fn get(&self, dir: &Path) -> Option<WorkspaceRecord> {
        let mut record = self.records.read().get(dir).cloned()?;
        if record.status == WorkspaceStatus::Active && !dir.join(".terraform").is_dir() {
            record.status = WorkspaceStatus::Stale;
        }
        Some(record)
    }

    /// All records, ordered by path.
    pub fn list(&self) -> Vec<WorkspaceRecord> {
        let mut records: Vec<WorkspaceRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Workspace selected in `dir`: `TF_WORKSPACE`, then `.terraform/environment`,
/// then `default`.
pub fn current_workspace(dir: &Path) -> String {
    if let Ok(name) = std::env::var("TF_WORKSPACE") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    fs::read_to_string(dir.join(".terraform").join("environment"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string())
}

/// Backend type from the first `backend "<type>"` block in `dir`'s `.tf`
/// files, or `local`.
pub fn detect_backend(dir: &Path) -> String {
    let Ok(pattern) = Regex::new(r#"backend\s+"([\w-]+)""#) else {
        return LOCAL_BACKEND.to_string();
    };

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|ext| ext == "tf").unwrap_or(false))
        .collect();
    files.sort();

    files
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .find_map(|content| pattern.captures(&content).map(|c| c[1].to_string()))
        .unwrap_or_else(|| LOCAL_BACKEND.to_string())
}
