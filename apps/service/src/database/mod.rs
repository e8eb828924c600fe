/// Record store abstraction
///
/// Check records are JSON documents keyed by collection and key. The engine
/// depends only on the `RecordStore` trait; `FileStore` keeps one file per
/// record on local disk.

pub mod models;
pub mod repository;

pub use models::{CHECKS_COLLECTION, CheckDefinition, Method, Protocol};
pub use repository::{FileStore, RecordStore, StoreError};
