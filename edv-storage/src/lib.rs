//! Pluggable storage for Encrypted Data Vaults.
//!
//! This crate defines the contract every persistence engine must satisfy
//! ([`EdvProvider`] / [`EdvStore`]) and ships two implementations:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Vault collection (edv crate)                │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!              ┌──────────────────┐
//!              │   EdvProvider    │  ← Unified trait
//!              └────────┬─────────┘
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!      ┌──────────┐          ┌──────────┐
//!      │  Memory  │          │  SQLite  │
//!      └──────────┘          └──────────┘
//! ```
//!
//! | Backend  | Durable | Indexing | Querying          |
//! |----------|---------|----------|-------------------|
//! | memory   | no      | no       | optional (scan)   |
//! | sqlite   | yes     | yes      | yes               |
//!
//! # Quick Start
//!
//! ```no_run
//! use edv_storage::{EdvProvider, EncryptedDocument, MemoryProvider, Query};
//! use serde_json::json;
//!
//! # async fn example() -> edv_storage::Result<()> {
//! let provider = MemoryProvider::with_scan_queries();
//! provider.create_store("vault").await?;
//!
//! let store = provider.open_store("vault").await?;
//! let doc = EncryptedDocument::new("VJYHHJx4C8J9Fsgz7rZqSp", json!({"ciphertext": "..."}))
//!     .with_attribute("hmac-name", "hmac-value");
//! store.insert(&doc).await?;
//!
//! let ids = store.query(&Query::equals("hmac-name", "hmac-value")).await?;
//! assert_eq!(ids, vec![doc.id.clone()]);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `sqlite` (default) - Enable the SQLite backend (bundled `rusqlite`)

mod error;
mod memory;
mod models;
mod query;
mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use error::{Result, StorageError};
pub use memory::{MemoryProvider, MemoryStore};
pub use models::{
    DataVaultConfiguration, DataVaultConfigurationMapping, EncryptedDocument, IdTypePair,
    IndexedAttribute, IndexedAttributeCollection,
};
pub use query::{Query, QueryAttribute};
pub use traits::{EdvProvider, EdvStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteProvider, SqliteStore, DEFAULT_POOL_SIZE};

// Re-export bytes for convenience
pub use bytes::Bytes;

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Process-local maps, lost on restart
    Memory {
        /// Answer queries with a full scan instead of `QueryingNotSupported`
        #[serde(default)]
        scan_queries: bool,
    },
    /// Single SQLite database file
    Sqlite {
        /// Database file path
        path: PathBuf,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Memory {
            scan_queries: false,
        }
    }
}

/// Create a storage backend from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn EdvProvider>> {
    match config {
        ProviderConfig::Memory { scan_queries: false } => Ok(Arc::new(MemoryProvider::new())),
        ProviderConfig::Memory { scan_queries: true } => {
            Ok(Arc::new(MemoryProvider::with_scan_queries()))
        }
        #[cfg(feature = "sqlite")]
        ProviderConfig::Sqlite { path } => Ok(Arc::new(SqliteProvider::open(path)?)),
        #[cfg(not(feature = "sqlite"))]
        ProviderConfig::Sqlite { .. } => Err(StorageError::Config(
            "SQLite storage requires the 'sqlite' feature".to_string(),
        )),
    }
}
