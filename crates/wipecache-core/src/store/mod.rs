//! Persistent store for offline data access.
//!
//! Collections are persisted per `(partition, scope)` where the partition is
//! the collection's fixed partition name and the scope is the account
//! identifier. The store holds no policy: no staleness, no schema. It is a
//! durable mirror that the query cache reads from when memory is empty.
//!
//! Backends:
//! - [`JsonFileStore`]: one JSON file per pair on disk
//! - [`MemoryStore`]: in-process, for tests and demo runs

pub mod file;
pub mod memory;
pub mod record;
pub mod shared;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::PersistentRecord;
pub use shared::{SharedStore, WriteGuard};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw storage backend. Errors are reported here and swallowed by
/// [`SharedStore`].
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn load(&self, partition: &str, scope: &str)
        -> Result<Option<PersistentRecord>, StoreError>;

    async fn save(&self, record: &PersistentRecord) -> Result<(), StoreError>;
}
