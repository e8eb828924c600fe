use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {collection}/{key} already exists")]
    Exists { collection: String, key: String },
    #[error("record {collection}/{key} not found")]
    NotFound { collection: String, key: String },
    #[error("invalid record key '{0}'")]
    InvalidKey(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record {collection}/{key} is not valid JSON: {source}")]
    Json {
        collection: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Document store keyed by collection and key.
///
/// The monitoring engine only reads, lists and updates; creation and deletion
/// belong to the CRUD layer but share this interface.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a new record, failing if the key is taken
    async fn create(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError>;

    async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError>;

    /// Replace an existing record
    async fn update(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError>;

    /// Remove a record; removing one that does not exist is not an error
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError>;

    /// Keys of every record in a collection, sorted
    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError>;
}

/// Record store backed by one JSON file per record:
/// `<base>/<collection>/<key>.json`
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        validate_segment(collection)?;
        Ok(self.base_dir.join(collection))
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_segment(key)?;
        Ok(self.collection_dir(collection)?.join(format!("{key}.json")))
    }

    fn encode(collection: &str, key: &str, doc: &Value) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(doc).map_err(|source| StoreError::Json {
            collection: collection.to_string(),
            key: key.to_string(),
            source,
        })
    }
}

fn validate_segment(segment: &str) -> Result<(), StoreError> {
    let valid = !segment.is_empty()
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid { Ok(()) } else { Err(StoreError::InvalidKey(segment.to_string())) }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn create(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError> {
        let dir = self.collection_dir(collection)?;
        let path = self.record_path(collection, key)?;
        let bytes = Self::encode(collection, key, doc)?;

        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::Exists {
                    collection: collection.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path)(e)),
        };
        file.write_all(&bytes).await.map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
        let path = self.record_path(collection, key)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path)(e)),
        };
        serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
            collection: collection.to_string(),
            key: key.to_string(),
            source,
        })
    }

    async fn update(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        let bytes = Self::encode(collection, key, doc)?;

        match fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path)(e)),
        }

        // Readers never observe a half-written record.
        let staging = path.with_extension("json.tmp");
        let mut file = fs::File::create(&staging).await.map_err(io_error(&staging))?;
        file.write_all(&bytes).await.map_err(io_error(&staging))?;
        file.flush().await.map_err(io_error(&staging))?;
        drop(file);
        fs::rename(&staging, &path).await.map_err(io_error(&path))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|name| name.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
