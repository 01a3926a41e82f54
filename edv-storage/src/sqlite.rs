//! SQLite-backed durable storage.
//!
//! All stores share one database file:
//!
//! ```text
//! stores(name)                          -- one row per store
//! entries(store, key, value)            -- documents and raw values
//! attributes(store, doc_id, name, value) -- indexed attributes of documents
//! ```
//!
//! Every store handle borrows connections from one fixed-size pool, so the
//! number of open files does not grow with the number of vaults. Uniqueness is
//! enforced by the primary keys, which makes create-if-absent atomic even
//! across connections.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::models::EncryptedDocument;
use crate::query::Query;
use crate::traits::{EdvProvider, EdvStore};

const BACKEND_NAME: &str = "sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections opened by [`SqliteProvider::open`].
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Fixed set of connections to one database file.
struct ConnectionPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn open(path: &Path, size: usize) -> Result<Self> {
        let conns = (0..size.max(1))
            .map(|_| open_connection(path).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// Take an idle connection if there is one, otherwise queue on the next in turn.
    async fn get(&self) -> MutexGuard<'_, Connection> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let len = self.conns.len();
        for offset in 0..len {
            if let Ok(conn) = self.conns[(start + offset) % len].try_lock() {
                return conn;
            }
        }
        self.conns[start % len].lock().await
    }

    fn len(&self) -> usize {
        self.conns.len()
    }
}

/// SQLite provider.
pub struct SqliteProvider {
    path: PathBuf,
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for SqliteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProvider")
            .field("path", &self.path)
            .field("connections", &self.pool.len())
            .finish_non_exhaustive()
    }
}

impl SqliteProvider {
    /// Open (or create) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    /// Open the database with `pool_size` connections shared by every store.
    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = open_connection(&path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                name  TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS entries (
                store TEXT NOT NULL,
                key   TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (store, key)
            );
            CREATE TABLE IF NOT EXISTS attributes (
                store  TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                name   TEXT NOT NULL,
                value  TEXT NOT NULL
            );
            "#,
        )?;
        drop(conn);

        let pool = ConnectionPool::open(&path, pool_size)?;
        debug!(
            "Opened SQLite database at {:?} with {} connections",
            path,
            pool.len()
        );
        Ok(Self {
            path,
            pool: Arc::new(pool),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pooled connections, independent of how many stores exist.
    pub fn connection_count(&self) -> usize {
        self.pool.len()
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // WAL mode + performance pragmas
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;",
    )?;
    Ok(conn)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl EdvProvider for SqliteProvider {
    #[instrument(skip(self))]
    async fn create_store(&self, name: &str) -> Result<()> {
        let conn = self.pool.get().await;
        match conn.execute("INSERT INTO stores (name) VALUES (?1)", params![name]) {
            Ok(_) => {
                debug!("Created SQLite store {}", name);
                Ok(())
            }
            Err(e) if is_constraint_violation(&e) => {
                Err(StorageError::DuplicateStore(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn open_store(&self, name: &str) -> Result<Arc<dyn EdvStore>> {
        let exists = {
            let conn = self.pool.get().await;
            conn.query_row("SELECT 1 FROM stores WHERE name = ?1", params![name], |_| {
                Ok(())
            })
            .optional()?
            .is_some()
        };
        if !exists {
            return Err(StorageError::StoreNotFound(name.to_string()));
        }

        Ok(Arc::new(SqliteStore {
            name: name.to_string(),
            pool: self.pool.clone(),
        }))
    }

    #[instrument(skip(self))]
    async fn delete_store(&self, name: &str) -> Result<()> {
        let mut conn = self.pool.get().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM attributes WHERE store = ?1", params![name])?;
        tx.execute("DELETE FROM entries WHERE store = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM stores WHERE name = ?1", params![name])?;
        tx.commit()?;

        if removed > 0 {
            debug!("Deleted SQLite store {}", name);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}

/// One SQLite-backed store.
pub struct SqliteStore {
    name: String,
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Upsert,
    CreateOnly,
    ReplaceExisting,
}

impl SqliteStore {
    fn write_value(
        conn: &Connection,
        store: &str,
        key: &str,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let sql = match mode {
            WriteMode::Upsert => {
                "INSERT OR REPLACE INTO entries (store, key, value) VALUES (?1, ?2, ?3)"
            }
            WriteMode::CreateOnly => "INSERT INTO entries (store, key, value) VALUES (?1, ?2, ?3)",
            WriteMode::ReplaceExisting => {
                "UPDATE entries SET value = ?3 WHERE store = ?1 AND key = ?2"
            }
        };

        match conn.execute(sql, params![store, key, value]) {
            Ok(0) if mode == WriteMode::ReplaceExisting => {
                Err(StorageError::ValueNotFound(key.to_string()))
            }
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                Err(StorageError::DuplicateValue(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(
        conn: &Connection,
        store: &str,
        document: &EncryptedDocument,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        Self::write_value(conn, store, &document.id, bytes, mode)?;

        conn.execute(
            "DELETE FROM attributes WHERE store = ?1 AND doc_id = ?2",
            params![store, &document.id],
        )?;

        let mut stmt = conn.prepare_cached(
            "INSERT INTO attributes (store, doc_id, name, value) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for attr in document.attributes() {
            stmt.execute(params![store, &document.id, &attr.name, &attr.value])?;
        }
        Ok(())
    }

    async fn write(&self, document: &EncryptedDocument, mode: WriteMode) -> Result<()> {
        let bytes = document.to_bytes()?;

        let mut conn = self.pool.get().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::write_document(&tx, &self.name, document, &bytes, mode)?;
        tx.commit()?;
        Ok(())
    }

    async fn create_index(&self, sql: &str) -> Result<()> {
        let conn = self.pool.get().await;
        conn.execute(sql, [])?;
        Ok(())
    }
}

#[async_trait]
impl EdvStore for SqliteStore {
    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn put(&self, document: &EncryptedDocument) -> Result<()> {
        self.write(document, WriteMode::Upsert).await
    }

    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn insert(&self, document: &EncryptedDocument) -> Result<()> {
        self.write(document, WriteMode::CreateOnly).await
    }

    #[instrument(skip(self, document), fields(store = %self.name, id = %document.id))]
    async fn update(&self, document: &EncryptedDocument) -> Result<()> {
        self.write(document, WriteMode::ReplaceExisting).await
    }

    #[instrument(skip(self, documents), fields(store = %self.name))]
    async fn upsert_bulk(&self, documents: Option<&[EncryptedDocument]>) -> Result<()> {
        let documents = documents.ok_or_else(|| {
            StorageError::InvalidInput("documents collection cannot be absent".to_string())
        })?;
        if documents.is_empty() {
            return Ok(());
        }

        let encoded = documents
            .iter()
            .map(|doc| Ok((doc, doc.to_bytes()?)))
            .collect::<Result<Vec<_>>>()?;

        debug!("Upserting {} documents", encoded.len());
        let mut conn = self.pool.get().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (doc, bytes) in &encoded {
            Self::write_document(&tx, &self.name, doc, bytes, WriteMode::Upsert)?;
        }
        tx.commit()?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(store = %self.name, size = value.len()))]
    async fn put_value(&self, key: &str, value: Bytes) -> Result<()> {
        let conn = self.pool.get().await;
        Self::write_value(&conn, &self.name, key, &value, WriteMode::Upsert)
    }

    #[instrument(skip(self, value), fields(store = %self.name, size = value.len()))]
    async fn insert_value(&self, key: &str, value: Bytes) -> Result<()> {
        let conn = self.pool.get().await;
        Self::write_value(&conn, &self.name, key, &value, WriteMode::CreateOnly)
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let conn = self.pool.get().await;
        let value: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM entries WHERE store = ?1 AND key = ?2",
                params![&self.name, key],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(Bytes::from)
            .ok_or_else(|| StorageError::ValueNotFound(key.to_string()))
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn get_all(&self) -> Result<Vec<Bytes>> {
        let conn = self.pool.get().await;
        let mut stmt =
            conn.prepare_cached("SELECT value FROM entries WHERE store = ?1 ORDER BY key")?;
        let values = stmt
            .query_map(params![&self.name], |row| row.get::<_, Vec<u8>>(0))?
            .map(|value| value.map(Bytes::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM attributes WHERE store = ?1 AND doc_id = ?2",
            params![&self.name, key],
        )?;
        let removed = tx.execute(
            "DELETE FROM entries WHERE store = ?1 AND key = ?2",
            params![&self.name, key],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn create_edv_index(&self) -> Result<()> {
        self.create_index(
            "CREATE INDEX IF NOT EXISTS idx_attributes_lookup ON attributes(store, name, value)",
        )
        .await
    }

    async fn create_encrypted_doc_id_index(&self) -> Result<()> {
        self.create_index(
            "CREATE INDEX IF NOT EXISTS idx_attributes_doc ON attributes(store, doc_id)",
        )
        .await
    }

    async fn create_reference_id_index(&self) -> Result<()> {
        self.create_index("CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key)")
            .await
    }

    #[instrument(skip(self, query), fields(store = %self.name, clauses = query.attributes.len()))]
    async fn query(&self, query: &Query) -> Result<Vec<String>> {
        let clauses = query.clauses();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        // The wanted pairs travel as one JSON parameter, so the statement is the
        // same for any number of names. A document matches when every name
        // matched at least one of its values.
        let pairs: Vec<[&str; 2]> = clauses
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| [*name, *value]))
            .collect();
        let pairs = serde_json::to_string(&pairs)?;
        let names = clauses.len() as i64;

        let conn = self.pool.get().await;
        let mut stmt = conn.prepare_cached(
            "SELECT a.doc_id FROM attributes a
             JOIN json_each(?2) q
               ON a.name = json_extract(q.value, '$[0]')
              AND a.value = json_extract(q.value, '$[1]')
             WHERE a.store = ?1
             GROUP BY a.doc_id
             HAVING COUNT(DISTINCT a.name) = ?3
             ORDER BY a.doc_id",
        )?;
        let ids = stmt
            .query_map(params![&self.name, pairs, names], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_provider() -> (SqliteProvider, TempDir) {
        let temp = TempDir::new().unwrap();
        let provider = SqliteProvider::open(temp.path().join("edv.db")).unwrap();
        (provider, temp)
    }

    async fn create_test_store(provider: &SqliteProvider) -> Arc<dyn EdvStore> {
        provider.create_store("vault").await.unwrap();
        provider.open_store("vault").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_store_twice() {
        let (provider, _temp) = create_test_provider();
        provider.create_store("vault").await.unwrap();

        let result = provider.create_store("vault").await;
        assert!(matches!(result, Err(StorageError::DuplicateStore(_))));
    }

    #[tokio::test]
    async fn test_open_missing_store() {
        let (provider, _temp) = create_test_provider();
        let result = provider.open_store("missing").await;
        assert!(matches!(result, Err(StorageError::StoreNotFound(_))));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        let doc = EncryptedDocument::new("doc1", json!({"ciphertext": "abc"}));
        store.put(&doc).await.unwrap();

        let bytes = store.get("doc1").await.unwrap();
        assert_eq!(bytes.as_ref(), doc.to_bytes().unwrap().as_slice());
        assert!(matches!(
            store.get("missing").await,
            Err(StorageError::ValueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_rejects_existing() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        let doc = EncryptedDocument::new("doc1", json!({}));
        store.insert(&doc).await.unwrap();
        assert!(matches!(
            store.insert(&doc).await,
            Err(StorageError::DuplicateValue(_))
        ));

        store
            .insert_value("ref:a", Bytes::from_static(b"v1"))
            .await
            .unwrap();
        assert!(matches!(
            store.insert_value("ref:a", Bytes::from_static(b"v2")).await,
            Err(StorageError::DuplicateValue(_))
        ));
    }

    #[tokio::test]
    async fn test_query_uses_latest_attributes() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;
        store.create_edv_index().await.unwrap();

        store
            .put(&EncryptedDocument::new("a", json!({})).with_attribute("n", "old"))
            .await
            .unwrap();
        store
            .put(&EncryptedDocument::new("a", json!({})).with_attribute("n", "new"))
            .await
            .unwrap();

        assert!(store.query(&Query::equals("n", "old")).await.unwrap().is_empty());
        assert_eq!(
            store.query(&Query::equals("n", "new")).await.unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_conjunction_and_disjunction() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        let docs = vec![
            EncryptedDocument::new("a", json!({}))
                .with_attribute("color", "red")
                .with_attribute("size", "L"),
            EncryptedDocument::new("b", json!({}))
                .with_attribute("color", "blue")
                .with_attribute("size", "L"),
            EncryptedDocument::new("c", json!({}))
                .with_attribute("color", "red")
                .with_attribute("size", "M"),
        ];
        store.upsert_bulk(Some(&docs)).await.unwrap();

        let query = Query::equals("color", "red")
            .or_equals("color", "blue")
            .or_equals("size", "L");
        assert_eq!(
            store.query(&query).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_attributes() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        store
            .put(&EncryptedDocument::new("a", json!({})).with_attribute("n", "v"))
            .await
            .unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());

        assert!(store.query(&Query::equals("n", "v")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        let doc = EncryptedDocument::new("a", json!({})).with_attribute("n", "v");
        assert!(matches!(
            store.update(&doc).await,
            Err(StorageError::ValueNotFound(_))
        ));
        assert!(store.get("a").await.is_err());
        assert!(store.query(&Query::equals("n", "v")).await.unwrap().is_empty());

        store.insert(&EncryptedDocument::new("a", json!({}))).await.unwrap();
        store.update(&doc).await.unwrap();
        assert_eq!(
            store.query(&Query::equals("n", "v")).await.unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_many_stores_share_the_pool() {
        let (provider, _temp) = create_test_provider();

        // More stores than a 1024 descriptor limit could hold at two files each.
        let mut stores = Vec::new();
        for i in 0..1100 {
            let name = format!("vault{}", i);
            provider.create_store(&name).await.unwrap();
            let store = provider.open_store(&name).await.unwrap();
            store
                .put(&EncryptedDocument::new("doc", json!({ "n": i })))
                .await
                .unwrap();
            stores.push(store);
        }
        assert_eq!(provider.connection_count(), DEFAULT_POOL_SIZE);

        for (i, store) in stores.iter().enumerate() {
            let doc: EncryptedDocument =
                serde_json::from_slice(&store.get("doc").await.unwrap()).unwrap();
            assert_eq!(doc.jwe, json!({ "n": i }));
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_open_files_do_not_grow_with_stores() {
        fn open_fds() -> usize {
            std::fs::read_dir("/proc/self/fd").unwrap().count()
        }

        let temp = TempDir::new().unwrap();
        let provider = SqliteProvider::open_with_pool_size(temp.path().join("edv.db"), 2).unwrap();
        provider.create_store("warmup").await.unwrap();
        let before = open_fds();

        let mut stores = Vec::new();
        for i in 0..400 {
            let name = format!("vault{}", i);
            provider.create_store(&name).await.unwrap();
            stores.push(provider.open_store(&name).await.unwrap());
        }

        // Other tests in this process open files too, so allow some slack.
        assert!(open_fds() < before + 300);
        assert_eq!(stores.len(), 400);
    }

    #[tokio::test]
    async fn test_pool_size_is_at_least_one() {
        let temp = TempDir::new().unwrap();
        let provider = SqliteProvider::open_with_pool_size(temp.path().join("edv.db"), 0).unwrap();
        assert_eq!(provider.connection_count(), 1);

        let store = create_test_store(&provider).await;
        store.put(&EncryptedDocument::new("doc", json!({}))).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_indexes_are_idempotent() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;

        for _ in 0..2 {
            store.create_edv_index().await.unwrap();
            store.create_encrypted_doc_id_index().await.unwrap();
            store.create_reference_id_index().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("edv.db");

        {
            let provider = SqliteProvider::open(&path).unwrap();
            let store = create_test_store(&provider).await;
            store
                .put(&EncryptedDocument::new("doc", json!({"k": "v"})))
                .await
                .unwrap();
        }

        let provider = SqliteProvider::open(&path).unwrap();
        let store = provider.open_store("vault").await.unwrap();
        let doc: EncryptedDocument =
            serde_json::from_slice(&store.get("doc").await.unwrap()).unwrap();
        assert_eq!(doc.jwe, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_delete_store() {
        let (provider, _temp) = create_test_provider();
        let store = create_test_store(&provider).await;
        store.put(&EncryptedDocument::new("doc", json!({}))).await.unwrap();

        provider.delete_store("vault").await.unwrap();
        assert!(provider.open_store("vault").await.is_err());

        provider.create_store("vault").await.unwrap();
        let store = provider.open_store("vault").await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }
}
