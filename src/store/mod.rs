//! Persistent case state
//!
//! One JSON file per case under the output directory. A save writes a
//! temporary file and renames it over the old one; whether a case is finished
//! is read from the record's `complete` flag, never from the file's presence.

use crate::scheduler::CaseState;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize case state: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Opens (creating if needed) the results directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, library: &str, operation: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.json", library, operation))
    }

    /// Loads a case, or `None` when there is no usable record. A file that
    /// fails to parse counts as absent.
    pub fn load(&self, library: &str, operation: &str) -> Option<CaseState> {
        let path = self.path_for(library, operation);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Error parsing results file '{}': {}. Starting fresh.", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, state: &CaseState) -> Result<(), StoreError> {
        let path = self.path_for(&state.library, state.operation.name());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;

        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }

    /// Every parseable case record in the directory.
    pub fn load_all(&self) -> Result<Vec<CaseState>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut states = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })?
                .path();
            if !path.is_file() || path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else { continue };
            match serde_json::from_str::<CaseState>(&content) {
                Ok(state) => states.push(state),
                Err(e) => warn!("Skipping unreadable results file '{}': {}", path.display(), e),
            }
        }
        states.sort_by(|a, b| (&a.library, a.operation).cmp(&(&b.library, b.operation)));
        Ok(states)
    }
}
