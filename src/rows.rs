//! Row store: the embedded relational store holding one row per secret.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::EngineError;
use crate::fsguard;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS secrets (
    key_hash TEXT PRIMARY KEY,
    key_enc  BLOB NOT NULL,
    iv       BLOB NOT NULL,
    cipher   BLOB NOT NULL,
    created  INTEGER NOT NULL,
    updated  INTEGER NOT NULL
);
";

/// One stored secret, fully encrypted.
#[derive(Clone, Debug)]
pub struct SecretRow {
    /// Hex HMAC-SHA256 of the plaintext name; primary key.
    pub key_hash: String,
    /// IV-prefixed AEAD ciphertext of the plaintext name.
    pub key_enc: Vec<u8>,
    /// IV for the value ciphertext.
    pub iv: Vec<u8>,
    /// AEAD ciphertext of the plaintext value, tag appended.
    pub cipher: Vec<u8>,
    /// Unix seconds.
    pub created: i64,
    /// Unix seconds.
    pub updated: i64,
}

/// WAL-mode SQLite wrapper. Single-connection, single-owner; concurrency
/// is the engine's problem, not this layer's.
#[derive(Debug)]
pub struct RowStore {
    conn: Option<Connection>,
    path: PathBuf,
}

impl RowStore {
    /// Open (creating if needed) the database at `path`, apply pragmas and
    /// the schema, and pin the file mode to 0600.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        fsguard::set_mode(path, fsguard::DATA_MODE)?;

        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
        })
    }

    fn conn(&self) -> Result<&Connection, rusqlite::Error> {
        self.conn.as_ref().ok_or_else(|| {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some("row store is closed".into()),
            )
        })
    }

    /// Insert or update the row for `key_hash`. An update preserves
    /// `created` and refreshes `updated`.
    pub fn upsert(
        &self,
        key_hash: &str,
        key_enc: &[u8],
        iv: &[u8],
        cipher: &[u8],
    ) -> Result<(), EngineError> {
        let now = Utc::now().timestamp();
        self.conn()?.execute(
            "INSERT INTO secrets (key_hash, key_enc, iv, cipher, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(key_hash) DO UPDATE SET
                 key_enc = excluded.key_enc,
                 iv      = excluded.iv,
                 cipher  = excluded.cipher,
                 updated = excluded.updated",
            params![key_hash, key_enc, iv, cipher, now],
        )?;
        Ok(())
    }

    pub fn find_by_hash(&self, key_hash: &str) -> Result<Option<SecretRow>, EngineError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT key_hash, key_enc, iv, cipher, created, updated
                 FROM secrets WHERE key_hash = ?1",
                params![key_hash],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Every stored row; used once per open to build the name index.
    pub fn find_all(&self) -> Result<Vec<SecretRow>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key_hash, key_enc, iv, cipher, created, updated FROM secrets",
        )?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove the row for `key_hash`; true iff a row was deleted.
    pub fn delete_by_hash(&self, key_hash: &str) -> Result<bool, EngineError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM secrets WHERE key_hash = ?1", params![key_hash])?;
        Ok(changed > 0)
    }

    /// Force a TRUNCATE checkpoint: all committed data lands in the main
    /// file and the WAL is emptied.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        let busy: i64 = self
            .conn()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
        if busy != 0 {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("wal checkpoint could not complete".into()),
            )
            .into());
        }
        Ok(())
    }

    /// Absolute path of the main database file.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(conn, e)| {
                self.conn = Some(conn);
                EngineError::from(e)
            })?;
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> Result<SecretRow, rusqlite::Error> {
        Ok(SecretRow {
            key_hash: row.get(0)?,
            key_enc: row.get(1)?,
            iv: row.get(2)?,
            cipher: row.get(3)?,
            created: row.get(4)?,
            updated: row.get(5)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
