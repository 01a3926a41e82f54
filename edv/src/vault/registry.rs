//! Reference-id bookkeeping.
//!
//! The registry lives in its own internal store and holds two kinds of
//! entries:
//!
//! ```text
//! ref:<referenceId>  -> <vaultId>                       (claimed atomically)
//! <vaultId>          -> DataVaultConfigurationMapping   (JSON)
//! ```

use std::sync::Arc;

use edv_storage::{
    Bytes, DataVaultConfiguration, DataVaultConfigurationMapping, EdvProvider, EdvStore,
    StorageError,
};
use tracing::{debug, instrument, warn};

use crate::{Error, Result};

/// Name of the internal store holding registry entries.
pub const REGISTRY_STORE: &str = "edv_registry";

const REFERENCE_KEY_PREFIX: &str = "ref:";

fn reference_key(reference_id: &str) -> String {
    format!("{}{}", REFERENCE_KEY_PREFIX, reference_id)
}

pub struct VaultRegistry {
    provider: Arc<dyn EdvProvider>,
}

impl VaultRegistry {
    /// Ensure the registry store exists and return a registry bound to it.
    ///
    /// Safe to call on every start: an existing registry is reused.
    pub async fn initialize(provider: Arc<dyn EdvProvider>) -> Result<Self> {
        match provider.create_store(REGISTRY_STORE).await {
            Ok(()) => debug!("Created vault registry store"),
            Err(StorageError::DuplicateStore(_)) => debug!("Reusing existing vault registry"),
            Err(e) => return Err(e.into()),
        }

        let store = provider.open_store(REGISTRY_STORE).await?;
        match store.create_reference_id_index().await {
            Ok(()) | Err(StorageError::IndexingNotSupported(_)) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self { provider })
    }

    async fn store(&self) -> Result<Arc<dyn EdvStore>> {
        Ok(self.provider.open_store(REGISTRY_STORE).await?)
    }

    /// Record `config` under `vault_id`, claiming its reference id.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateVault`] if another vault already holds the reference id.
    #[instrument(skip(self, config), fields(reference_id = %config.reference_id))]
    pub async fn store_data_vault_configuration(
        &self,
        config: &DataVaultConfiguration,
        vault_id: &str,
    ) -> Result<()> {
        let store = self.store().await?;
        let key = reference_key(&config.reference_id);

        match store.get(&key).await {
            Ok(_) => return Err(Error::DuplicateVault(config.reference_id.clone())),
            Err(e) if e.is_value_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        // The existence check above is only a fast path; this insert is what
        // decides between concurrent claims.
        store
            .insert_value(&key, Bytes::from(vault_id.to_string()))
            .await
            .map_err(|e| match e {
                StorageError::DuplicateValue(_) => {
                    Error::DuplicateVault(config.reference_id.clone())
                }
                other => other.into(),
            })?;

        let mapping = DataVaultConfigurationMapping {
            configuration: config.clone(),
            vault_id: vault_id.to_string(),
        };
        let record = match serde_json::to_vec(&mapping) {
            Ok(record) => record,
            Err(e) => {
                self.release(&store, &key).await;
                return Err(e.into());
            }
        };

        if let Err(e) = store.put_value(vault_id, Bytes::from(record)).await {
            self.release(&store, &key).await;
            return Err(e.into());
        }

        debug!("Registered vault {}", vault_id);
        Ok(())
    }

    async fn release(&self, store: &Arc<dyn EdvStore>, key: &str) {
        if let Err(e) = store.delete(key).await {
            warn!("Failed to release reference claim {}: {}", key, e);
        }
    }

    /// Fetch the configuration a vault was created with.
    ///
    /// # Errors
    ///
    /// [`Error::VaultNotFound`] if no vault was registered under `vault_id`.
    #[instrument(skip(self))]
    pub async fn retrieve_data_vault_configuration(
        &self,
        vault_id: &str,
    ) -> Result<DataVaultConfiguration> {
        let store = self.store().await?;

        let bytes = store.get(vault_id).await.map_err(|e| match e {
            StorageError::ValueNotFound(_) => Error::VaultNotFound(vault_id.to_string()),
            other => other.into(),
        })?;

        let mapping: DataVaultConfigurationMapping = serde_json::from_slice(&bytes)?;
        Ok(mapping.configuration)
    }
}
