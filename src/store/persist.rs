use super::state::StoreFile;
use crate::shared::fs_atomic::atomic_write_file;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const SAVE_ATTEMPTS: u32 = 5;
const SAVE_BACKOFF_STEP_MS: u64 = 25;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create store path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read store {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse store {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write store {path} after {attempts} attempts: {source}")]
    Write {
        path: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode store {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store at {path} is not initialized; run workforce.init first")]
    NotInitialized { path: String },
    #[error("{0}")]
    Invalid(String),
}

pub fn store_file_path(state_root: &Path) -> PathBuf {
    state_root.join("workforce.json")
}

/// Lenient load: a missing file is `None`; unknown fields in the document are
/// ignored and missing optional fields fall back to their defaults.
pub fn load_store(state_root: &Path) -> Result<Option<StoreFile>, StoreError> {
    let path = store_file_path(state_root);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let store = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(store))
}

/// Seeds a fresh document. Returns `(store, created)`; an existing document is
/// returned untouched unless `force` is set.
pub fn init_store(
    state_root: &Path,
    now_ms: i64,
    force: bool,
) -> Result<(StoreFile, bool), StoreError> {
    if !force {
        if let Some(existing) = load_store(state_root)? {
            return Ok((existing, false));
        }
    }
    let store = StoreFile::seeded(now_ms);
    save_store(state_root, &store)?;
    Ok((store, true))
}

/// Atomic persist with bounded retry: temp-file write plus rename, retried
/// with linear backoff on transient filesystem errors.
pub fn save_store(state_root: &Path, store: &StoreFile) -> Result<(), StoreError> {
    let path = store_file_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let body = serde_json::to_vec_pretty(store).map_err(|source| StoreError::Encode {
        path: path.display().to_string(),
        source,
    })?;

    let mut last_error: Option<std::io::Error> = None;
    for attempt in 1..=SAVE_ATTEMPTS {
        match atomic_write_file(&path, &body) {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_error = Some(err);
                if attempt < SAVE_ATTEMPTS {
                    thread::sleep(Duration::from_millis(
                        SAVE_BACKOFF_STEP_MS * u64::from(attempt),
                    ));
                }
            }
        }
    }
    Err(StoreError::Write {
        path: path.display().to_string(),
        attempts: SAVE_ATTEMPTS,
        source: last_error.unwrap_or_else(|| std::io::Error::other("unknown write failure")),
    })
}

/// Single mutation entry point: load, apply, stamp, trim, save. The store
/// assumes one active writer process; concurrent writers to the same path are
/// not coordinated.
pub fn mutate_store<T, E>(
    state_root: &Path,
    now_ms: i64,
    mutate: impl FnOnce(&mut StoreFile) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let mut store = load_store(state_root)?.ok_or_else(|| StoreError::NotInitialized {
        path: store_file_path(state_root).display().to_string(),
    })?;
    let value = mutate(&mut store)?;
    store.updated_at_ms = now_ms;
    store.trim_history();
    save_store(state_root, &store)?;
    Ok(value)
}
