//! Durable batch state as one JSON file per batch.

use async_trait::async_trait;
use atomic_write_file::AtomicWriteFile;
use foundry_core::{BatchState, StateStore, StoreError, StoreResult};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Batch states under `<dir>/<batch_id>.json`.
///
/// Saves go through [`AtomicWriteFile`] (write-to-temp, fsync, rename), so a
/// crash mid-save leaves either the previous file or the new one on disk,
/// never a torn record. That is the property `recover()` depends on.
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    /// Opens the state directory, creating it if missing.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn state_path(&self, batch_id: &str) -> StoreResult<PathBuf> {
        // Batch ids become file names; reject anything that would escape the
        // state directory.
        if batch_id.is_empty() || batch_id.contains(['/', '\\']) || batch_id.contains("..") {
            return Err(StoreError::Io(format!(
                "batch id {batch_id:?} is not usable as a state file name"
            )));
        }
        Ok(self.dir.join(format!("{batch_id}.json")))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn save(&self, state: &BatchState) -> StoreResult<()> {
        let path = self.state_path(&state.batch_id)?;
        let bytes = serde_json::to_vec_pretty(state)?;
        let written = tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let mut file = AtomicWriteFile::open(&path)?;
            file.write_all(&bytes)?;
            file.commit()?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Io(format!("state write task failed: {err}")))?;
        if written.is_ok() {
            debug!(batch = %state.batch_id, phase = %state.phase, "persisted batch state");
        }
        written
    }

    async fn load(&self, batch_id: &str) -> StoreResult<Option<BatchState>> {
        let path = self.state_path(batch_id)?;
        let bytes = tokio::task::spawn_blocking(move || -> StoreResult<Option<Vec<u8>>> {
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
        .await
        .map_err(|err| StoreError::Io(format!("state read task failed: {err}")))??;

        match bytes {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| {
                    StoreError::corrupted(format!("state file for {batch_id}: {err}"))
                }),
        }
    }

    async fn delete(&self, batch_id: &str) -> StoreResult<()> {
        let path = self.state_path(batch_id)?;
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
        .await
        .map_err(|err| StoreError::Io(format!("state delete task failed: {err}")))?
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<Vec<String>> {
            let mut ids = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let name = entry?.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
            ids.sort();
            Ok(ids)
        })
        .await
        .map_err(|err| StoreError::Io(format!("state list task failed: {err}")))?
    }
}
