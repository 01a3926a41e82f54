//! In-memory storage implementation.
//!
//! This is the default backend for tests and single-process deployments.
//! Nothing survives a restart. It cannot build indexes and, unless
//! constructed with [`MemoryProvider::with_scan_queries`], cannot evaluate
//! queries either.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::models::EncryptedDocument;
use crate::query::Query;
use crate::traits::{EdvProvider, EdvStore};

const BACKEND_NAME: &str = "memory";

/// In-memory provider.
///
/// The catalog lock is only held while a store is created, opened or dropped;
/// each store carries its own lock for its entries.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    stores: RwLock<HashMap<String, Arc<MemoryStore>>>,
    scan_queries: bool,
}

impl MemoryProvider {
    /// Provider whose stores reject queries with `QueryingNotSupported`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose stores answer queries with a full scan.
    pub fn with_scan_queries() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            scan_queries: true,
        }
    }

    /// Number of stores currently allocated.
    pub fn store_count(&self) -> usize {
        self.stores.read().len()
    }
}

#[async_trait]
impl EdvProvider for MemoryProvider {
    #[instrument(skip(self))]
    async fn create_store(&self, name: &str) -> Result<()> {
        let mut stores = self.stores.write();
        if stores.contains_key(name) {
            return Err(StorageError::DuplicateStore(name.to_string()));
        }

        debug!("Creating in-memory store {}", name);
        stores.insert(
            name.to_string(),
            Arc::new(MemoryStore::new(name, self.scan_queries)),
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn open_store(&self, name: &str) -> Result<Arc<dyn EdvStore>> {
        match self.stores.read().get(name) {
            Some(store) => Ok(store.clone() as Arc<dyn EdvStore>),
            None => Err(StorageError::StoreNotFound(name.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn delete_store(&self, name: &str) -> Result<()> {
        if self.stores.write().remove(name).is_some() {
            debug!("Deleted in-memory store {}", name);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}

/// One in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    entries: RwLock<BTreeMap<String, Bytes>>,
    scan_queries: bool,
}

impl MemoryStore {
    fn new(name: &str, scan_queries: bool) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(BTreeMap::new()),
            scan_queries,
        }
    }

    fn scan(&self, query: &Query) -> Vec<String> {
        let entries = self.entries.read();
        entries
            .values()
            .filter_map(|bytes| serde_json::from_slice::<EncryptedDocument>(bytes).ok())
            .filter(|doc| query.matches(doc))
            .map(|doc| doc.id)
            .collect()
    }
}

#[async_trait]
impl EdvStore for MemoryStore {
    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn put(&self, document: &EncryptedDocument) -> Result<()> {
        let bytes = Bytes::from(document.to_bytes()?);
        self.entries.write().insert(document.id.clone(), bytes);
        Ok(())
    }

    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn insert(&self, document: &EncryptedDocument) -> Result<()> {
        let bytes = Bytes::from(document.to_bytes()?);
        self.insert_value(&document.id, bytes).await
    }

    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn update(&self, document: &EncryptedDocument) -> Result<()> {
        let bytes = Bytes::from(document.to_bytes()?);
        match self.entries.write().get_mut(&document.id) {
            Some(existing) => {
                *existing = bytes;
                Ok(())
            }
            None => Err(StorageError::ValueNotFound(document.id.clone())),
        }
    }

    #[instrument(skip(self, documents), fields(store = %self.name))]
    async fn upsert_bulk(&self, documents: Option<&[EncryptedDocument]>) -> Result<()> {
        let documents = documents.ok_or_else(|| {
            StorageError::InvalidInput("documents collection cannot be absent".to_string())
        })?;

        // Serialize everything before taking the lock so a bad document leaves the store untouched.
        let encoded = documents
            .iter()
            .map(|doc| Ok((doc.id.clone(), Bytes::from(doc.to_bytes()?))))
            .collect::<Result<Vec<_>>>()?;

        debug!("Upserting {} documents", encoded.len());
        let mut entries = self.entries.write();
        for (id, bytes) in encoded {
            entries.insert(id, bytes);
        }
        Ok(())
    }

    #[instrument(skip(self, value), fields(store = %self.name, size = value.len()))]
    async fn put_value(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    #[instrument(skip(self, value), fields(store = %self.name, size = value.len()))]
    async fn insert_value(&self, key: &str, value: Bytes) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(StorageError::DuplicateValue(key.to_string()));
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ValueNotFound(key.to_string()))
    }

    async fn get_all(&self) -> Result<Vec<Bytes>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn create_edv_index(&self) -> Result<()> {
        Err(StorageError::IndexingNotSupported(BACKEND_NAME))
    }

    async fn create_encrypted_doc_id_index(&self) -> Result<()> {
        Err(StorageError::IndexingNotSupported(BACKEND_NAME))
    }

    async fn create_reference_id_index(&self) -> Result<()> {
        Err(StorageError::IndexingNotSupported(BACKEND_NAME))
    }

    #[instrument(skip(self, query), fields(store = %self.name, clauses = query.attributes.len()))]
    async fn query(&self, query: &Query) -> Result<Vec<String>> {
        if !self.scan_queries {
            return Err(StorageError::QueryingNotSupported(BACKEND_NAME));
        }
        Ok(self.scan(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_store(provider: &MemoryProvider) -> Arc<dyn EdvStore> {
        provider.create_store("vault").await.unwrap();
        provider.open_store("vault").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_store_twice() {
        let provider = MemoryProvider::new();
        provider.create_store("vault").await.unwrap();

        let result = provider.create_store("vault").await;
        assert!(matches!(result, Err(StorageError::DuplicateStore(_))));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        let doc = EncryptedDocument::new("doc1", json!({"ciphertext": "abc"}));
        store.put(&doc).await.unwrap();

        let bytes = store.get("doc1").await.unwrap();
        assert_eq!(bytes.as_ref(), doc.to_bytes().unwrap().as_slice());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        let result = store.get("missing").await;
        assert!(matches!(result, Err(StorageError::ValueNotFound(_))));
    }

    #[tokio::test]
    async fn test_insert_rejects_existing() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        let doc = EncryptedDocument::new("doc1", json!({}));
        store.insert(&doc).await.unwrap();

        let result = store.insert(&doc).await;
        assert!(matches!(result, Err(StorageError::DuplicateValue(_))));
    }

    #[tokio::test]
    async fn test_stores_are_isolated() {
        let provider = MemoryProvider::new();
        provider.create_store("a").await.unwrap();
        provider.create_store("b").await.unwrap();

        let a = provider.open_store("a").await.unwrap();
        let b = provider.open_store("b").await.unwrap();
        a.put(&EncryptedDocument::new("doc", json!({}))).await.unwrap();

        assert!(b.get("doc").await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_bulk_absent_vs_empty() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        assert!(matches!(
            store.upsert_bulk(None).await,
            Err(StorageError::InvalidInput(_))
        ));
        store.upsert_bulk(Some(&[])).await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_bulk_overwrites() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        store
            .put(&EncryptedDocument::new("a", json!({"v": 1})))
            .await
            .unwrap();

        let docs = vec![
            EncryptedDocument::new("a", json!({"v": 2})),
            EncryptedDocument::new("b", json!({"v": 3})),
        ];
        store.upsert_bulk(Some(&docs)).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let first: EncryptedDocument = serde_json::from_slice(&all[0]).unwrap();
        assert_eq!(first.jwe, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        store.put(&EncryptedDocument::new("doc", json!({}))).await.unwrap();
        assert!(store.delete("doc").await.unwrap());
        assert!(!store.delete("doc").await.unwrap());

        assert!(store.get("doc").await.is_err());
    }

    #[tokio::test]
    async fn test_indexing_not_supported() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        assert!(matches!(
            store.create_edv_index().await,
            Err(StorageError::IndexingNotSupported("memory"))
        ));
        assert!(store.create_encrypted_doc_id_index().await.is_err());
        assert!(store.create_reference_id_index().await.is_err());
    }

    #[tokio::test]
    async fn test_query_not_supported_by_default() {
        let provider = MemoryProvider::new();
        let store = create_test_store(&provider).await;

        let result = store.query(&Query::equals("n", "v")).await;
        assert!(matches!(result, Err(StorageError::QueryingNotSupported(_))));
    }

    #[tokio::test]
    async fn test_scan_query() {
        let provider = MemoryProvider::with_scan_queries();
        let store = create_test_store(&provider).await;

        store
            .put(&EncryptedDocument::new("b", json!({})).with_attribute("n", "v"))
            .await
            .unwrap();
        store
            .put(&EncryptedDocument::new("a", json!({})).with_attribute("n", "v"))
            .await
            .unwrap();
        store
            .put(&EncryptedDocument::new("c", json!({})).with_attribute("n", "other"))
            .await
            .unwrap();
        store.put_value("raw", Bytes::from_static(b"not a document")).await.unwrap();

        let ids = store.query(&Query::equals("n", "v")).await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let none = store.query(&Query::equals("n", "missing")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_store() {
        let provider = MemoryProvider::new();
        provider.create_store("vault").await.unwrap();
        provider.delete_store("vault").await.unwrap();
        provider.delete_store("vault").await.unwrap();

        assert_eq!(provider.store_count(), 0);
        provider.create_store("vault").await.unwrap();
    }
}
