//! File-backed sinks.
//!
//! All file access goes through `tokio::fs`, so a slow disk stalls only the
//! connection being served, not the runtime worker.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::debug;

use super::{AuditLog, VariableStore};
use crate::error::SinkError;

/// Both sink files hold agent output and are readable by the owner only.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

fn owner_only(options: &mut OpenOptions) -> &mut OpenOptions {
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options
}

/// Newline-delimited JSON audit log.
///
/// The file is created with mode `0600` on first append. Each record is
/// written with a single `write_all` on an `O_APPEND` handle.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// Log that appends to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> io::Result<File> {
        owner_only(OpenOptions::new().create(true).append(true)).open(&self.path).await
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append_record(&self, record: &[u8]) -> Result<(), SinkError> {
        let mut line = record.trim_ascii_end().to_vec();
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = self.open().await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), bytes = line.len(), "audit record appended");
        Ok(())
    }
}

type VariableMap = BTreeMap<String, Vec<String>>;

/// YAML file holding a `key -> [values]` map.
///
/// Updates are read-modify-write: the file is loaded, the value appended if
/// absent, and the result written to a fresh `0600` sibling temp file and
/// renamed over the original. A missing file is an empty map.
#[derive(Debug)]
pub struct YamlVariableStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl YamlVariableStore {
    /// Store persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    /// Load the current map.
    ///
    /// # Errors
    ///
    /// - [`SinkError::Io`] if the file exists but cannot be read
    /// - [`SinkError::Decode`] if it is not a `key -> [values]` map
    pub async fn load(&self) -> Result<VariableMap, SinkError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VariableMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(VariableMap::new());
        }

        let map: Option<VariableMap> =
            serde_yaml::from_str(&text).map_err(|e| SinkError::Decode(e.to_string()))?;
        Ok(map.unwrap_or_default())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn store(&self, map: &VariableMap) -> Result<(), SinkError> {
        let text = serde_yaml::to_string(map).map_err(|e| SinkError::Encode(e.to_string()))?;

        // A leftover temp file would keep its old permissions; start fresh.
        let temp = self.temp_path();
        match fs::remove_file(&temp).await {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }

        let mut file = owner_only(OpenOptions::new().write(true).create_new(true)).open(&temp).await?;
        file.write_all(text.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl VariableStore for YamlVariableStore {
    async fn upsert(&self, key: &str, value: &str) -> Result<bool, SinkError> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.load().await?;
        let values = map.entry(key.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            return Ok(false);
        }
        values.push(value.to_string());

        self.store(&map).await?;
        debug!(path = %self.path.display(), key, value, "variable stored");
        Ok(true)
    }
}
