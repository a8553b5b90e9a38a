//! Storage backends for snapshot and alert persistence
//!
//! ## Design
//!
//! - **Trait-based**: `MetricsStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with the scheduler
//! - **Single writer**: backends serialize writes internally
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, durable across restarts
//! - **In-Memory**: No persistence, for `storage.backend = "none"` and tests
//!
//! ## Usage
//!
//! ```no_run
//! use vigil::config::StorageConfig;
//! use vigil::storage::open_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = open_store(&StorageConfig::default()).await?;
//!     println!("{}", store.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, MetricsStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{AlertEvent, AlertTransition, HourlyBucket};

use crate::config::StorageConfig;

/// Open the backend selected by the configuration
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn MetricsStore>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, history is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::Unavailable(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
