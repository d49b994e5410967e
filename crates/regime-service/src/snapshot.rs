// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::state::ServiceState;
use regime_core::{RegimeError, Timestamp};
use regime_online::PayloadCodec;
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_SUFFIX: &str = ".json";
pub const DEFAULT_SNAPSHOT_KEEP: usize = 5;

/// Rotating directory of service snapshots.
///
/// File names embed a zero-padded nanosecond timestamp so lexical order is
/// chronological. Only the newest `keep` files survive a save.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    keep: usize,
    codec: PayloadCodec,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, keep: usize, codec: PayloadCodec) -> Result<Self, RegimeError> {
        if keep == 0 {
            return Err(RegimeError::invalid_input("snapshot keep must be >= 1"));
        }
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            RegimeError::invalid_input(format!(
                "failed to create snapshot directory {}: {err}",
                dir.display()
            ))
        })?;
        Ok(Self { dir, keep, codec })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot files, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, RegimeError> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            RegimeError::invalid_input(format!(
                "failed to read snapshot directory {}: {err}",
                self.dir.display()
            ))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| {
                        name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX)
                    })
            })
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>, RegimeError> {
        Ok(self.list()?.pop())
    }

    pub fn save(&self, state: &ServiceState) -> Result<PathBuf, RegimeError> {
        let nanos = Timestamp::now().as_unix_nanos().max(0);
        let path = self
            .dir
            .join(format!("{SNAPSHOT_PREFIX}{nanos:020}{SNAPSHOT_SUFFIX}"));
        state.save_snapshot_file(&path, self.codec)?;
        self.rotate()?;
        Ok(path)
    }

    /// Restores the newest snapshot; `Ok(None)` when the directory is empty.
    pub fn restore_latest(&self, state: &ServiceState) -> Result<Option<PathBuf>, RegimeError> {
        let Some(path) = self.latest()? else {
            return Ok(None);
        };
        state.load_snapshot_file(&path)?;
        Ok(Some(path))
    }

    fn rotate(&self) -> Result<(), RegimeError> {
        let files = self.list()?;
        let excess = files.len().saturating_sub(self.keep);
        for stale in &files[..excess] {
            if let Err(err) = fs::remove_file(stale) {
                tracing::warn!(path = %stale.display(), error = %err, "failed to remove old snapshot");
            }
        }
        Ok(())
    }
}
