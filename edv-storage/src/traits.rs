//! Core storage trait definitions.
//!
//! [`EdvProvider`] owns a set of named stores (one per vault, plus internal
//! namespaces). [`EdvStore`] is a handle bound to one of them. Every backend
//! must behave identically through these traits, except where it reports
//! [`StorageError::IndexingNotSupported`] or
//! [`StorageError::QueryingNotSupported`].
//!
//! [`StorageError::IndexingNotSupported`]: crate::StorageError::IndexingNotSupported
//! [`StorageError::QueryingNotSupported`]: crate::StorageError::QueryingNotSupported

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::models::EncryptedDocument;
use crate::query::Query;

/// Factory for named stores.
///
/// # Thread Safety
///
/// A single provider is shared by every request, so implementations must be
/// `Send + Sync` and must not hold a lock that spans unrelated stores while a
/// store operation runs.
#[async_trait]
pub trait EdvProvider: Send + Sync {
    /// Allocate a new, empty store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DuplicateStore` if the name is taken. The check
    /// and the creation are a single atomic step.
    async fn create_store(&self, name: &str) -> Result<()>;

    /// Open a handle to an existing store.
    ///
    /// Cheap and idempotent; callers open a store before every operation.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::StoreNotFound` if no store has this name.
    async fn open_store(&self, name: &str) -> Result<Arc<dyn EdvStore>>;

    /// Remove a store and everything in it. No-op if the store does not exist.
    async fn delete_store(&self, name: &str) -> Result<()>;

    /// Get a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;
}

/// Handle to one store.
#[async_trait]
pub trait EdvStore: Send + Sync {
    /// Insert or overwrite a document under its id.
    async fn put(&self, document: &EncryptedDocument) -> Result<()>;

    /// Insert a document only if its id is not present yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DuplicateValue` if the id is already stored.
    async fn insert(&self, document: &EncryptedDocument) -> Result<()>;

    /// Replace a document that is already stored under its id.
    ///
    /// The existence check and the write are one atomic step, so an update
    /// racing a delete never brings the document back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ValueNotFound` if the id is not stored.
    async fn update(&self, document: &EncryptedDocument) -> Result<()>;

    /// Put every document in order, all or nothing.
    ///
    /// `Some(&[])` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidInput` when `documents` is `None`.
    async fn upsert_bulk(&self, documents: Option<&[EncryptedDocument]>) -> Result<()>;

    /// Store a raw, unindexed value under `key`, overwriting any previous one.
    async fn put_value(&self, key: &str, value: Bytes) -> Result<()>;

    /// Store a raw, unindexed value only if `key` is not present yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DuplicateValue` if the key is already stored.
    async fn insert_value(&self, key: &str, value: Bytes) -> Result<()>;

    /// Fetch the raw bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ValueNotFound` if nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Fetch every stored value, ordered by key.
    async fn get_all(&self) -> Result<Vec<Bytes>>;

    /// Remove the entry for `key`, returning whether one was there.
    ///
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Build the attribute index used by [`EdvStore::query`].
    async fn create_edv_index(&self) -> Result<()>;

    /// Build an index over document ids.
    async fn create_encrypted_doc_id_index(&self) -> Result<()>;

    /// Build an index over registry keys.
    async fn create_reference_id_index(&self) -> Result<()>;

    /// Ids of every document matching `query`, in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QueryingNotSupported` if the backend cannot
    /// evaluate queries. An empty vector means no document matched.
    async fn query(&self, query: &Query) -> Result<Vec<String>>;
}
