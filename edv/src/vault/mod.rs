//! Vault lifecycle: identifiers, the reference-id registry, and the
//! collection that ties them to a storage provider.

mod collection;
mod id;
mod registry;

pub use collection::VaultCollection;
pub use id::{generate_vault_id, validate_document_id, ID_BYTE_LEN};
pub use registry::{VaultRegistry, REGISTRY_STORE};
