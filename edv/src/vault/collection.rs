use std::sync::Arc;

use edv_storage::{
    Bytes, DataVaultConfiguration, EdvProvider, EdvStore, EncryptedDocument, Query, StorageError,
};
use tracing::{debug, info, instrument, warn};

use super::id::{generate_vault_id, validate_document_id};
use super::registry::{VaultRegistry, REGISTRY_STORE};
use crate::{Error, Result};

/// Vault lifecycle and document operations over a shared storage provider.
///
/// Every call opens the target store afresh, so a collection can be shared
/// behind an `Arc` by all request handlers.
pub struct VaultCollection {
    provider: Arc<dyn EdvProvider>,
    registry: VaultRegistry,
}

impl VaultCollection {
    pub async fn new(provider: Arc<dyn EdvProvider>) -> Result<Self> {
        let registry = VaultRegistry::initialize(provider.clone()).await?;
        info!(
            "Vault collection ready on {} storage",
            provider.backend_name()
        );
        Ok(Self { provider, registry })
    }

    pub fn backend_name(&self) -> &'static str {
        self.provider.backend_name()
    }

    /// Create a vault and return its generated id.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `referenceId` is blank
    /// - [`Error::DuplicateVault`] if the reference id is already registered
    #[instrument(skip(self, config), fields(reference_id = %config.reference_id))]
    pub async fn create_data_vault(&self, config: &DataVaultConfiguration) -> Result<String> {
        if config.reference_id.trim().is_empty() {
            return Err(Error::Validation("referenceId can't be blank".to_string()));
        }

        let vault_id = generate_vault_id();

        self.provider
            .create_store(&vault_id)
            .await
            .map_err(|e| match e {
                StorageError::DuplicateStore(_) => {
                    Error::DuplicateVault(config.reference_id.clone())
                }
                other => other.into(),
            })?;

        if let Err(e) = self.prepare_vault(config, &vault_id).await {
            if let Err(cleanup) = self.provider.delete_store(&vault_id).await {
                warn!("Failed to remove store of vault {}: {}", vault_id, cleanup);
            }
            metrics::counter!("edv_vaults_created_total", "outcome" => "failed").increment(1);
            return Err(e);
        }

        metrics::counter!("edv_vaults_created_total", "outcome" => "created").increment(1);
        info!("Created vault {}", vault_id);
        Ok(vault_id)
    }

    async fn prepare_vault(&self, config: &DataVaultConfiguration, vault_id: &str) -> Result<()> {
        let store = self.provider.open_store(vault_id).await?;

        for result in [
            store.create_edv_index().await,
            store.create_encrypted_doc_id_index().await,
        ] {
            match result {
                Ok(()) => {}
                Err(StorageError::IndexingNotSupported(backend)) => {
                    debug!("Skipping index creation, {} backend has no indexes", backend);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.registry
            .store_data_vault_configuration(config, vault_id)
            .await
    }

    /// Configuration the vault was created with.
    pub async fn data_vault_configuration(&self, vault_id: &str) -> Result<DataVaultConfiguration> {
        self.registry
            .retrieve_data_vault_configuration(vault_id)
            .await
    }

    /// Store a new document. Never overwrites.
    ///
    /// # Errors
    ///
    /// - [`Error::VaultNotFound`] if the vault does not exist
    /// - [`Error::NotBase58Encoded`] / [`Error::Not128BitValue`] for a malformed id
    /// - [`Error::DuplicateDocument`] if the id is already present in this vault
    #[instrument(skip(self, document), fields(doc_id = %document.id))]
    pub async fn create_document(&self, vault_id: &str, document: &EncryptedDocument) -> Result<()> {
        let store = self.open_vault(vault_id).await?;
        validate_document_id(&document.id)?;

        match store.get(&document.id).await {
            Ok(_) => return Err(Error::DuplicateDocument(document.id.clone())),
            Err(StorageError::ValueNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        store.insert(document).await.map_err(|e| match e {
            StorageError::DuplicateValue(_) => Error::DuplicateDocument(document.id.clone()),
            other => other.into(),
        })?;

        metrics::counter!("edv_documents_created_total").increment(1);
        debug!("Stored document in vault {}", vault_id);
        Ok(())
    }

    /// Raw stored bytes of a document.
    #[instrument(skip(self))]
    pub async fn read_document(&self, vault_id: &str, doc_id: &str) -> Result<Bytes> {
        let store = self.open_vault(vault_id).await?;
        store.get(doc_id).await.map_err(|e| not_found_as_document(e, doc_id))
    }

    /// Replace an existing document.
    ///
    /// `doc_id` must match the id inside `document`.
    #[instrument(skip(self, document))]
    pub async fn update_document(
        &self,
        vault_id: &str,
        doc_id: &str,
        document: &EncryptedDocument,
    ) -> Result<()> {
        if document.id != doc_id {
            return Err(Error::Validation(format!(
                "document id {} does not match {}",
                document.id, doc_id
            )));
        }

        let store = self.open_vault(vault_id).await?;
        validate_document_id(doc_id)?;

        store
            .update(document)
            .await
            .map_err(|e| not_found_as_document(e, doc_id))
    }

    #[instrument(skip(self))]
    pub async fn delete_document(&self, vault_id: &str, doc_id: &str) -> Result<()> {
        let store = self.open_vault(vault_id).await?;

        if !store.delete(doc_id).await? {
            return Err(Error::DocumentNotFound(doc_id.to_string()));
        }
        debug!("Deleted document from vault {}", vault_id);
        Ok(())
    }

    /// Insert or replace a batch of documents.
    ///
    /// Every id is validated before anything is written.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn upsert_documents(
        &self,
        vault_id: &str,
        documents: &[EncryptedDocument],
    ) -> Result<()> {
        let store = self.open_vault(vault_id).await?;
        for document in documents {
            validate_document_id(&document.id)?;
        }
        store.upsert_bulk(Some(documents)).await?;
        Ok(())
    }

    /// Ids of the documents matching `query`, possibly none.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the query has no attributes
    /// - [`Error::VaultNotFound`] if the vault does not exist
    /// - `QueryingNotSupported` from backends that cannot evaluate queries
    #[instrument(skip(self, query), fields(clauses = query.attributes.len()))]
    pub async fn query_vault(&self, vault_id: &str, query: &Query) -> Result<Vec<String>> {
        if query.is_empty() {
            return Err(Error::Validation(
                "query must name at least one attribute".to_string(),
            ));
        }

        let store = self.open_vault(vault_id).await?;
        match store.query(query).await {
            Ok(ids) => {
                metrics::counter!("edv_queries_total", "outcome" => "ok").increment(1);
                debug!("Query matched {} documents", ids.len());
                Ok(ids)
            }
            Err(e) => {
                metrics::counter!("edv_queries_total", "outcome" => "error").increment(1);
                Err(e.into())
            }
        }
    }

    async fn open_vault(&self, vault_id: &str) -> Result<Arc<dyn EdvStore>> {
        if vault_id == REGISTRY_STORE {
            return Err(Error::VaultNotFound(vault_id.to_string()));
        }

        self.provider.open_store(vault_id).await.map_err(|e| match e {
            StorageError::StoreNotFound(_) => Error::VaultNotFound(vault_id.to_string()),
            other => other.into(),
        })
    }
}

fn not_found_as_document(e: StorageError, doc_id: &str) -> Error {
    match e {
        StorageError::ValueNotFound(_) => Error::DocumentNotFound(doc_id.to_string()),
        other => other.into(),
    }
}
