//! State backup and rollback around mutating operations.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{IacError, IacResult};

/// Local state file name.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Prefix of backup file names; a timestamp follows.
pub const BACKUP_PREFIX: &str = "terraform.tfstate.backup-";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// Snapshot of the state file taken before a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBackup {
    pub source_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// What happened to the state after the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The operation succeeded, or never touched state
    #[default]
    NotNeeded,
    /// The operation failed and rollback was off
    NotRequested,
    /// Rollback was requested but there was nothing to restore
    NoBackup,
    Restored,
    Failed { error: String },
}

impl RollbackOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Backup-before, restore-on-failure guard for one working directory.
#[derive(Debug, Clone)]
pub struct StateGuard {
    state_path: PathBuf,
    backup_dir: PathBuf,
    enabled: bool,
}

impl StateGuard {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            state_path: working_dir.join(STATE_FILE),
            backup_dir: working_dir.to_path_buf(),
            enabled: true,
        }
    }

    /// Write backups somewhere other than the working directory.
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Copy the live state aside.
    ///
    /// Returns `None` when backups are disabled or there is no state yet.
    /// Any I/O failure is an error, and the operation must not proceed.
    pub fn backup(&self) -> IacResult<Option<StateBackup>> {
        if !self.enabled {
            debug!("State backup disabled");
            return Ok(None);
        }
        if !self.state_path.is_file() {
            debug!("No state at {}, nothing to back up", self.state_path.display());
            return Ok(None);
        }

        let failed = |source: std::io::Error| IacError::BackupFailed {
            path: self.state_path.clone(),
            source,
        };

        fs::create_dir_all(&self.backup_dir).map_err(failed)?;

        let timestamp = Utc::now();
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let mut backup_path = self.backup_dir.join(format!("{}{}", BACKUP_PREFIX, stamp));
        let mut n = 1;
        while backup_path.exists() {
            backup_path = self
                .backup_dir
                .join(format!("{}{}-{}", BACKUP_PREFIX, stamp, n));
            n += 1;
        }

        fs::copy(&self.state_path, &backup_path).map_err(failed)?;
        info!("Backed up state to {}", backup_path.display());

        Ok(Some(StateBackup {
            source_path: self.state_path.clone(),
            backup_path,
            timestamp,
        }))
    }

    /// Settle the state once the operation has finished.
    pub fn finish(
        &self,
        backup: Option<&StateBackup>,
        succeeded: bool,
        rollback: bool,
    ) -> RollbackOutcome {
        if succeeded {
            return RollbackOutcome::NotNeeded;
        }
        if !rollback {
            return RollbackOutcome::NotRequested;
        }
        let Some(backup) = backup else {
            warn!("Rollback requested but no state backup was taken");
            return RollbackOutcome::NoBackup;
        };

        match Self::restore(backup) {
            Ok(()) => {
                warn!(
                    "Restored state from {} after failed operation",
                    backup.backup_path.display()
                );
                RollbackOutcome::Restored
            }
            Err(e) => {
                error!(
                    "Failed to restore state from {}: {}",
                    backup.backup_path.display(),
                    e
                );
                RollbackOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Copy a backup over the live state file.
    ///
    /// The copy goes to a sibling file first and is renamed into place.
    pub fn restore(backup: &StateBackup) -> std::io::Result<()> {
        let mut staging = backup.source_path.clone().into_os_string();
        staging.push(".restoring");
        let staging = PathBuf::from(staging);

        fs::copy(&backup.backup_path, &staging)?;
        if let Err(e) = fs::rename(&staging, &backup.source_path) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        Ok(())
    }

    /// Existing backups in the backup directory, oldest first.
    pub fn list_backups(&self) -> IacResult<Vec<PathBuf>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(BACKUP_PREFIX))
                    .unwrap_or(false)
            })
            .collect();
        backups.sort();
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STATE: &str = r#"{"version": 4, "serial": 7, "resources": []}"#;

    #[test]
    fn test_no_state_no_backup() {
        let dir = TempDir::new().unwrap();
        let guard = StateGuard::new(dir.path());
        assert!(guard.backup().unwrap().is_none());
    }

    #[test]
    fn test_disabled_guard_skips_backup() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), STATE).unwrap();
        let guard = StateGuard::new(dir.path()).enabled(false);
        assert!(guard.backup().unwrap().is_none());
        assert!(guard.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_backup_copies_verbatim() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), STATE).unwrap();

        let backup = StateGuard::new(dir.path()).backup().unwrap().unwrap();

        let name = backup.backup_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(BACKUP_PREFIX));
        assert_eq!(name.len(), BACKUP_PREFIX.len() + "20260101T000000.000".len());
        assert_eq!(backup.backup_path.parent(), Some(dir.path()));
        assert_eq!(fs::read_to_string(&backup.backup_path).unwrap(), STATE);
    }

    #[test]
    fn test_backups_never_overwrite_each_other() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), STATE).unwrap();
        let guard = StateGuard::new(dir.path());

        let first = guard.backup().unwrap().unwrap();
        let second = guard.backup().unwrap().unwrap();
        assert_ne!(first.backup_path, second.backup_path);
        assert_eq!(guard.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_backup_dir_override() {
        let dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), STATE).unwrap();

        let target = elsewhere.path().join("backups");
        let backup = StateGuard::new(dir.path())
            .backup_dir(&target)
            .backup()
            .unwrap()
            .unwrap();
        assert_eq!(backup.backup_path.parent(), Some(target.as_path()));
    }

    #[test]
    fn test_rollback_restores_bytes() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join(STATE_FILE);
        fs::write(&state_path, STATE).unwrap();
        let guard = StateGuard::new(dir.path());

        let backup = guard.backup().unwrap();
        fs::write(&state_path, "corrupted by a half-finished apply").unwrap();

        let outcome = guard.finish(backup.as_ref(), false, true);
        assert_eq!(outcome, RollbackOutcome::Restored);
        assert_eq!(fs::read_to_string(&state_path).unwrap(), STATE);
    }

    #[test]
    fn test_finish_outcomes() {
        let dir = TempDir::new().unwrap();
        let guard = StateGuard::new(dir.path());

        assert_eq!(guard.finish(None, true, true), RollbackOutcome::NotNeeded);
        assert_eq!(guard.finish(None, false, false), RollbackOutcome::NotRequested);
        assert_eq!(guard.finish(None, false, true), RollbackOutcome::NoBackup);
    }

    #[test]
    fn test_rollback_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let guard = StateGuard::new(dir.path());
        let missing = StateBackup {
            source_path: dir.path().join(STATE_FILE),
            backup_path: dir.path().join("gone"),
            timestamp: Utc::now(),
        };

        let outcome = guard.finish(Some(&missing), false, true);
        assert!(outcome.is_failed());
    }

    #[test]
    fn test_rollback_outcome_serializes_with_status() {
        let json = serde_json::to_string(&RollbackOutcome::Failed {
            error: "disk full".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","error":"disk full"}"#);
    }
}
