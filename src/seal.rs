//! Integrity sealer: a keyed seal over the raw database file, stored in
//! the meta document and checked on every open.
//!
//! Seal formula: `HMAC-SHA256(master_key, SHA256(file_bytes(store.db)))`.
//! Verification checkpoints the WAL first so the hash always covers the
//! normalized main file; steady-state writes re-seal without checkpointing
//! and rely on the next verify to normalize.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::crypto::{self, MasterKey};
use crate::error::EngineError;
use crate::fsguard;
use crate::rows::RowStore;

/// Current meta document format version.
pub const META_VERSION: &str = "1";

/// The sidecar document next to the database file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaDocument {
    /// Format version tag.
    pub version: String,
    /// Hex-encoded 32-byte scrypt salt, fixed at store creation.
    pub salt: String,
    /// Hex-encoded seal over the current database file.
    pub integrity: String,
}

/// Compute the current seal value.
pub fn compute(rows: &RowStore, key: &MasterKey) -> Result<[u8; 32], EngineError> {
    let file_bytes = fs::read(rows.file_path())?;
    Ok(crypto::hmac(key, &crypto::sha256(&file_bytes)))
}

/// Verify the stored seal against the database file.
///
/// Forces a WAL checkpoint before hashing: stale WAL data, or a
/// checkpoint performed by a third party since the seal was written,
/// would otherwise make the comparison meaningless.
pub fn verify(
    rows: &RowStore,
    key: &MasterKey,
    meta_text: Option<&str>,
) -> Result<(), EngineError> {
    let text = meta_text.ok_or_else(|| EngineError::Integrity("metadata file missing".into()))?;
    let doc: MetaDocument = serde_json::from_str(text)
        .map_err(|_| EngineError::Integrity("metadata file corrupted".into()))?;

    if doc.version != META_VERSION {
        return Err(EngineError::Integrity(format!(
            "unsupported metadata version {:?}",
            doc.version
        )));
    }

    rows.checkpoint()
        .map_err(|e| EngineError::Integrity(format!("checkpoint failed: {}", e)))?;

    let computed = compute(rows, key)?;
    let stored = hex::decode(&doc.integrity)
        .map_err(|_| EngineError::Integrity("metadata file corrupted".into()))?;

    if bool::from(stored.as_slice().ct_eq(&computed)) {
        Ok(())
    } else {
        Err(EngineError::Integrity(
            "integrity seal mismatch; the database file changed outside the store".into(),
        ))
    }
}

/// Recompute the seal and rewrite the meta document, preserving the
/// version tag and salt. `checkpoint` is true on close (and for the very
/// first seal of a new store) and false on steady-state mutations.
pub fn update(
    rows: &RowStore,
    key: &MasterKey,
    dir: &Path,
    salt_hex: &str,
    checkpoint: bool,
) -> Result<(), EngineError> {
    if checkpoint {
        rows.checkpoint()?;
    }
    let seal = compute(rows, key)?;
    let doc = MetaDocument {
        version: META_VERSION.into(),
        salt: salt_hex.to_string(),
        integrity: hex::encode(seal),
    };
    let text = serde_json::to_string_pretty(&doc)
        .map_err(|e| EngineError::Integrity(format!("metadata serialization failed: {}", e)))?;
    fsguard::write_meta(dir, &text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
