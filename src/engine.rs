//! The engine: open/get/set/delete orchestration over the crypto, row
//! store and integrity sealer layers.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::crypto::{self, MasterKey, IV_LEN, SALT_LEN, TAG_LEN};
use crate::error::EngineError;
use crate::fsguard;
use crate::glob::Matcher;
use crate::identity;
use crate::paths::{self, StoreLocation};
use crate::rows::RowStore;
use crate::seal;

/// Grace time for the OS to release database file handles before the
/// storage directory is removed.
const HANDLE_RELEASE_DELAY: Duration = Duration::from_millis(150);
/// Directory removal retries during destroy.
const REMOVE_ATTEMPTS: u32 = 5;
/// Base backoff between removal attempts, scaled by attempt number.
const REMOVE_BACKOFF: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Open options
// ---------------------------------------------------------------------------

/// Where to open (or create) the store.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Explicit absolute storage directory; wins over `location`.
    pub path: Option<PathBuf>,
    /// Named location, used when `path` is absent.
    pub location: Option<StoreLocation>,
}

impl OpenOptions {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            location: None,
        }
    }

    pub fn in_location(location: StoreLocation) -> Self {
        Self {
            path: None,
            location: Some(location),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An open secret store.
///
/// Names and values are encrypted individually; lookup goes through a
/// blind HMAC index, and a keyed seal over the database file is refreshed
/// on every mutation. Not safe for concurrent use from parallel threads;
/// serialize externally if you need that.
#[derive(Debug)]
pub struct SecretsEngine {
    dir: PathBuf,
    rows: RowStore,
    master_key: MasterKey,
    salt_hex: String,
    /// key_hash -> plaintext name; sole source of truth for `keys`/`size`.
    index: HashMap<String, String>,
    closed: bool,
}

impl SecretsEngine {
    /// Open the store, creating it on first use.
    ///
    /// For an existing store this verifies the integrity seal (fatal on
    /// mismatch) and decrypts every stored name into the in-memory index;
    /// a single undecryptable row is skipped with a warning.
    pub async fn open(options: OpenOptions) -> Result<Self, EngineError> {
        let dir = paths::resolve_dir(options.path.as_deref(), options.location)?;

        fsguard::ensure_dir(&dir)?;
        let keyfile = fsguard::ensure_keyfile(&dir)?;
        let meta_text = fsguard::read_meta(&dir)?;

        // A parseable meta document marks an existing store whose salt we
        // must reuse; anything else means we are creating from scratch.
        let existing_salt = meta_text
            .as_deref()
            .and_then(|text| serde_json::from_str::<seal::MetaDocument>(text).ok())
            .map(|doc| doc.salt);
        let is_existing = existing_salt.is_some();
        let salt_hex = match existing_salt {
            Some(salt) => salt,
            None => hex::encode(crypto::random_salt()?),
        };
        let salt = decode_salt(&salt_hex)?;

        let machine_id = identity::machine_identity();
        let master_key = crypto::derive_master_key(&machine_id, &keyfile, &salt)?;

        let mut rows = RowStore::open(&fsguard::db_path(&dir))?;
        let bootstrapped = Self::bootstrap(
            &rows,
            &master_key,
            &dir,
            &salt_hex,
            is_existing,
            meta_text.as_deref(),
        );
        let index = match bootstrapped {
            Ok(index) => index,
            Err(e) => {
                let _ = rows.close();
                return Err(e);
            }
        };

        if is_existing {
            debug!(path = %dir.display(), entries = index.len(), "opened secret store");
        } else {
            info!(path = %dir.display(), "created new secret store");
        }

        Ok(Self {
            dir,
            rows,
            master_key,
            salt_hex,
            index,
            closed: false,
        })
    }

    /// Verify (existing store), build the name index, and write the first
    /// seal (new store).
    fn bootstrap(
        rows: &RowStore,
        master_key: &MasterKey,
        dir: &Path,
        salt_hex: &str,
        is_existing: bool,
        meta_text: Option<&str>,
    ) -> Result<HashMap<String, String>, EngineError> {
        if is_existing {
            seal::verify(rows, master_key, meta_text)?;
        }

        let index = Self::build_index(rows, master_key)?;

        if !is_existing {
            // First seal: checkpointed, so it covers the schema DDL.
            seal::update(rows, master_key, dir, salt_hex, true)?;
        }
        Ok(index)
    }

    fn build_index(
        rows: &RowStore,
        master_key: &MasterKey,
    ) -> Result<HashMap<String, String>, EngineError> {
        let mut index = HashMap::new();
        for row in rows.find_all()? {
            if row.key_enc.len() < IV_LEN + TAG_LEN {
                warn!(
                    key_hash = truncate_hash(&row.key_hash),
                    "skipping entry with truncated name ciphertext"
                );
                continue;
            }
            let (iv, ciphertext) = row.key_enc.split_at(IV_LEN);
            match crypto::decrypt(master_key, iv, ciphertext, Some(&row.key_hash)) {
                Ok(name) => {
                    index.insert(row.key_hash, name);
                }
                Err(EngineError::Decryption { .. }) => {
                    warn!(
                        key_hash = truncate_hash(&row.key_hash),
                        "skipping entry whose name cannot be decrypted"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(index)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch and decrypt a secret, or `None` if the name is not stored.
    pub async fn get(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.assert_open();
        let key_hash = crypto::hmac_hex(&self.master_key, name.as_bytes());
        match self.rows.find_by_hash(&key_hash)? {
            None => Ok(None),
            Some(row) => crypto::decrypt(
                &self.master_key,
                &row.iv,
                &row.cipher,
                Some(&row.key_hash),
            )
            .map(Some),
        }
    }

    /// As [`get`](Self::get), but an absent name is an error.
    pub async fn get_required(&self, name: &str) -> Result<String, EngineError> {
        self.get(name)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    /// Whether a secret exists. Pure in-memory lookup; no I/O, no
    /// decryption.
    pub fn has(&self, name: &str) -> bool {
        self.assert_open();
        let key_hash = crypto::hmac_hex(&self.master_key, name.as_bytes());
        self.index.contains_key(&key_hash)
    }

    /// All stored names, sorted ascending, optionally filtered by a glob
    /// pattern (`*` matches within one dot-separated segment).
    pub fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        self.assert_open();
        let mut names: Vec<String> = match pattern {
            Some(p) => {
                let matcher = Matcher::new(p);
                self.index
                    .values()
                    .filter(|name| matcher.is_match(name))
                    .cloned()
                    .collect()
            }
            None => self.index.values().cloned().collect(),
        };
        names.sort();
        names
    }

    /// Number of stored secrets.
    pub fn size(&self) -> usize {
        self.assert_open();
        self.index.len()
    }

    /// The resolved storage directory.
    pub fn storage_path(&self) -> &Path {
        &self.dir
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store or overwrite a secret. Both the name and the value are
    /// encrypted; the integrity seal is refreshed before returning.
    pub async fn set(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.assert_open();

        let key_hash = crypto::hmac_hex(&self.master_key, name.as_bytes());
        let (name_iv, name_ct) = crypto::encrypt(&self.master_key, name)?;
        let mut key_enc = Vec::with_capacity(IV_LEN + name_ct.len());
        key_enc.extend_from_slice(&name_iv);
        key_enc.extend_from_slice(&name_ct);

        let (value_iv, value_ct) = crypto::encrypt(&self.master_key, value)?;

        self.rows.upsert(&key_hash, &key_enc, &value_iv, &value_ct)?;
        self.index.insert(key_hash, name.to_string());

        // Steady-state seal: no checkpoint; the next verify normalizes.
        seal::update(&self.rows, &self.master_key, &self.dir, &self.salt_hex, false)
    }

    /// Remove a secret; true iff it existed.
    pub async fn delete(&mut self, name: &str) -> Result<bool, EngineError> {
        self.assert_open();

        let key_hash = crypto::hmac_hex(&self.master_key, name.as_bytes());
        let removed = self.rows.delete_by_hash(&key_hash)?;
        if removed {
            self.index.remove(&key_hash);
            seal::update(&self.rows, &self.master_key, &self.dir, &self.salt_hex, false)?;
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Checkpoint, seal, and release the store. Idempotent; every other
    /// operation panics once the engine is closed.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        // Seal over the checkpointed main file so the next open verifies
        // regardless of what happens to the WAL in between.
        seal::update(&self.rows, &self.master_key, &self.dir, &self.salt_hex, true)?;
        self.rows.close()?;
        self.index.clear();
        self.closed = true;
        debug!(path = %self.dir.display(), "closed secret store");
        Ok(())
    }

    /// Close if needed, then remove the storage directory and everything
    /// in it. Retries on busy/permission errors to tolerate lingering OS
    /// handles on the WAL/SHM sidecar files.
    pub async fn destroy(mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.rows.checkpoint()?;
            self.rows.close()?;
            self.index.clear();
            self.closed = true;
        }

        tokio::time::sleep(HANDLE_RELEASE_DELAY).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match std::fs::remove_dir_all(&self.dir) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) if attempt < REMOVE_ATTEMPTS && is_retryable(&e) => {
                    debug!(
                        path = %self.dir.display(),
                        attempt,
                        error = %e,
                        "storage directory busy, retrying removal"
                    );
                    tokio::time::sleep(REMOVE_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(path = %self.dir.display(), "destroyed secret store");
        Ok(())
    }

    fn assert_open(&self) {
        if self.closed {
            panic!("instance is closed");
        }
    }
}

fn decode_salt(salt_hex: &str) -> Result<[u8; SALT_LEN], EngineError> {
    hex::decode(salt_hex)
        .ok()
        .and_then(|bytes| <[u8; SALT_LEN]>::try_from(bytes).ok())
        .ok_or_else(|| EngineError::Integrity("metadata file corrupted".into()))
}

fn truncate_hash(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::PermissionDenied | ErrorKind::WouldBlock
    ) || e.raw_os_error() == Some(16) // EBUSY
}
