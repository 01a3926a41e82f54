//! Document and vault identifiers.
//!
//! Document ids are client supplied and must be base58 encodings of 128-bit
//! values. The check works on decoded bytes, not bits: a value of 121 to 127
//! significant bits still decodes to 16 bytes and is accepted.

use uuid::Uuid;

use crate::{Error, Result};

/// Decoded length of a valid document id.
pub const ID_BYTE_LEN: usize = 16;

/// Check that `id` is a base58-encoded 16-byte value.
///
/// # Errors
///
/// [`Error::NotBase58Encoded`] if `id` does not decode to any bytes, and
/// [`Error::Not128BitValue`] if it decodes to anything other than 16 bytes.
pub fn validate_document_id(id: &str) -> Result<()> {
    let decoded = bs58::decode(id).into_vec().unwrap_or_default();

    if decoded.is_empty() {
        return Err(Error::NotBase58Encoded);
    }
    if decoded.len() != ID_BYTE_LEN {
        return Err(Error::Not128BitValue);
    }
    Ok(())
}

/// Fresh vault id: base58 of a random UUID.
///
/// The result is itself a valid 128-bit base58 id and never contains `:` or
/// `_`, so it cannot collide with registry keys or internal store names.
pub fn generate_vault_id() -> String {
    bs58::encode(Uuid::new_v4().as_bytes()).into_string()
}
