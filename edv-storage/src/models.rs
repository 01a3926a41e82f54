//! Wire and storage models for vaults and documents.
//!
//! Documents arrive already encrypted. The only parts the server looks at are
//! the document `id` and the `indexed` attribute collections; the `jwe`
//! payload is carried through untouched.

use serde::{Deserialize, Serialize};

/// An id/type pair naming a key or HMAC suite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTypePair {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Configuration submitted when a vault is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVaultConfiguration {
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegator: Option<String>,
    pub reference_id: String,
    #[serde(default)]
    pub kek: IdTypePair,
    #[serde(default)]
    pub hmac: IdTypePair,
}

impl DataVaultConfiguration {
    /// Minimal configuration carrying only a reference id.
    pub fn with_reference_id(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            ..Default::default()
        }
    }
}

/// Registry record: the submitted configuration plus the vault id it was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVaultConfigurationMapping {
    #[serde(rename = "dataVaultConfiguration")]
    pub configuration: DataVaultConfiguration,
    #[serde(rename = "vaultID")]
    pub vault_id: String,
}

/// A single name/value pair the client chose to leave queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub unique: bool,
}

/// A group of indexed attributes computed with the same HMAC key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAttributeCollection {
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<IdTypePair>,
    #[serde(default)]
    pub attributes: Vec<IndexedAttribute>,
}

/// An opaque encrypted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedDocument {
    pub id: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexed: Vec<IndexedAttributeCollection>,
    #[serde(default)]
    pub jwe: serde_json::Value,
}

impl EncryptedDocument {
    /// Create a document with no indexed attributes.
    pub fn new(id: impl Into<String>, jwe: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            sequence: 0,
            indexed: Vec::new(),
            jwe,
        }
    }

    /// Add an indexed attribute to the first attribute collection.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if self.indexed.is_empty() {
            self.indexed.push(IndexedAttributeCollection::default());
        }
        self.indexed[0].attributes.push(IndexedAttribute {
            name: name.into(),
            value: value.into(),
            unique: false,
        });
        self
    }

    /// Every indexed attribute across all collections.
    pub fn attributes(&self) -> impl Iterator<Item = &IndexedAttribute> {
        self.indexed.iter().flat_map(|c| c.attributes.iter())
    }

    /// Canonical stored form of the document.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
