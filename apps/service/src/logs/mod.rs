//! Per-check append-only evaluation logs.
//!
//! Each check has one live log, `<dir>/<check_id>.log`, holding one JSON
//! `LogEntry` per line. Rotation moves the live contents into an immutable
//! `<dir>/<check_id>-<unix_millis>.gz.b64` artifact and truncates the live
//! file; history is never deleted.

pub mod archive;
pub mod entry;

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error};

pub use entry::LogEntry;

const LIVE_EXTENSION: &str = ".log";
const MAX_NAME_ATTEMPTS: i64 = 1000;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log id '{0}'")]
    InvalidId(String),
    #[error("log I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no free artifact name for log '{0}'")]
    NameExhausted(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LogError + '_ {
    move |source| LogError::Io { path: path.to_path_buf(), source }
}

/// Append, list, rotate and read back per-check logs.
///
/// Append and rotate on the same check id are serialized; different ids never
/// contend.
pub struct CheckLogger {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CheckLogger {
    /// Open (creating if needed) the log directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
        Ok(Self { dir, locks: Mutex::new(HashMap::new()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `op` while holding the check's log mutex.
    ///
    /// The mutex is dropped from the table once nobody else holds or awaits
    /// it, so ids of deleted checks do not accumulate.
    async fn locked<T>(
        &self,
        check_id: &str,
        op: impl Future<Output = Result<T, LogError>>,
    ) -> Result<T, LogError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(check_id.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            op.await
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under this table lock, so the count is exact.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(check_id);
        }
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn file_path(&self, file_id: &str, extension: &str) -> Result<PathBuf, LogError> {
        let valid = !file_id.is_empty()
            && file_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(LogError::InvalidId(file_id.to_string()));
        }
        Ok(self.dir.join(format!("{file_id}{extension}")))
    }

    fn live_path(&self, check_id: &str) -> Result<PathBuf, LogError> {
        self.file_path(check_id, LIVE_EXTENSION)
    }

    /// Append one entry to the check's live log, creating it if absent
    pub async fn append(&self, check_id: &str, entry: &LogEntry) -> Result<(), LogError> {
        let path = self.live_path(check_id)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        self.locked(check_id, async {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(io_error(&path))?;
            file.write_all(line.as_bytes()).await.map_err(io_error(&path))?;
            file.flush().await.map_err(io_error(&path))
        })
        .await
    }

    /// Ids of logs in the directory, sorted.
    ///
    /// Live logs are listed by check id; rotated artifacts, when included, by
    /// `<check_id>-<unix_millis>`.
    pub async fn list_logs(&self, include_compressed: bool) -> Result<Vec<String>, LogError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if let Some(id) = name.strip_suffix(LIVE_EXTENSION) {
                ids.push(id.to_string());
            } else if include_compressed {
                if let Some(id) = name.strip_suffix(archive::ARCHIVE_EXTENSION) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn list_live_logs(&self) -> Result<Vec<String>, LogError> {
        self.list_logs(false).await
    }

    /// Current contents of a live log; a missing log reads as empty
    pub async fn read_live(&self, check_id: &str) -> Result<String, LogError> {
        let path = self.live_path(check_id)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Archive the live log into a new compressed artifact and truncate it.
    ///
    /// Returns the artifact path, or `None` when there was nothing to archive.
    pub async fn rotate(&self, check_id: &str) -> Result<Option<PathBuf>, LogError> {
        let live = self.live_path(check_id)?;
        self.locked(check_id, async {
            let contents = match fs::read_to_string(&live).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(io_error(&live)(e)),
            };
            if contents.is_empty() {
                debug!(check_id, "Live log is empty, nothing to rotate");
                return Ok(None);
            }

            let encoded = archive::compress(&contents).map_err(io_error(&live))?;
            let artifact = self.write_artifact(check_id, &encoded).await?;
            commit_rotation(check_id, &live, &artifact).await?;

            debug!(check_id, artifact = %artifact.display(), bytes = contents.len(), "Rotated log");
            Ok(Some(artifact))
        })
        .await
    }

    /// Empty a live log without archiving it
    pub async fn truncate(&self, check_id: &str) -> Result<(), LogError> {
        let live = self.live_path(check_id)?;
        self.locked(check_id, truncate_file(&live)).await
    }

    /// Contents of a rotated artifact, by its `<check_id>-<unix_millis>` id
    pub async fn decompress(&self, file_id: &str) -> Result<String, LogError> {
        let path = self.file_path(file_id, archive::ARCHIVE_EXTENSION)?;
        let encoded = fs::read_to_string(&path).await.map_err(io_error(&path))?;
        archive::decompress(&encoded).map_err(io_error(&path))
    }

    async fn write_artifact(&self, check_id: &str, encoded: &str) -> Result<PathBuf, LogError> {
        let stamp = Utc::now().timestamp_millis();

        // Artifacts are never overwritten; a clashing stamp is bumped.
        for offset in 0..MAX_NAME_ATTEMPTS {
            let path =
                self.file_path(&format!("{check_id}-{}", stamp + offset), archive::ARCHIVE_EXTENSION)?;
            let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(&path)(e)),
            };
            file.write_all(encoded.as_bytes()).await.map_err(io_error(&path))?;
            file.flush().await.map_err(io_error(&path))?;
            return Ok(path);
        }

        Err(LogError::NameExhausted(check_id.to_string()))
    }
}

/// Truncate the live log now that `artifact` holds its contents.
///
/// If truncation fails the artifact is removed again, so the next rotation
/// archives the same entries exactly once.
async fn commit_rotation(check_id: &str, live: &Path, artifact: &Path) -> Result<(), LogError> {
    let Err(e) = truncate_file(live).await else {
        return Ok(());
    };

    if let Err(remove_error) = fs::remove_file(artifact).await {
        error!(
            check_id,
            artifact = %artifact.display(),
            truncate_error = %e,
            error = %remove_error,
            "Rotated log was neither truncated nor rolled back; its entries will be archived twice"
        );
    }
    Err(e)
}

async fn truncate_file(path: &Path) -> Result<(), LogError> {
    match fs::OpenOptions::new().write(true).truncate(true).open(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}
