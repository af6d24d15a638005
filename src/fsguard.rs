//! Filesystem guard: directory, keyfile and meta file lifecycle under
//! strict permission modes. All mode handling is POSIX-only; on other
//! platforms the checks are skipped and the OS defaults are trusted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::EngineError;

/// Storage directory mode.
pub const DIR_MODE: u32 = 0o700;
/// Keyfile mode. Written once, read-only afterwards.
pub const KEYFILE_MODE: u32 = 0o400;
/// Database and meta file mode.
pub const DATA_MODE: u32 = 0o600;

/// Keyfile name inside the storage directory.
pub const KEYFILE_NAME: &str = ".keyfile";
/// Meta document name inside the storage directory.
pub const META_NAME: &str = "meta.json";
/// Database file name inside the storage directory.
pub const DB_NAME: &str = "store.db";

pub fn keyfile_path(dir: &Path) -> PathBuf {
    dir.join(KEYFILE_NAME)
}

pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_NAME)
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join(DB_NAME)
}

// ---------------------------------------------------------------------------
// Mode helpers
// ---------------------------------------------------------------------------

/// Set the permission bits of `path` (no-op off POSIX).
pub fn set_mode(path: &Path, mode: u32) -> Result<(), EngineError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Assert that `path` has exactly the expected permission bits.
fn verify_mode(path: &Path, expected: u32) -> Result<(), EngineError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let actual = fs::metadata(path)?.permissions().mode() & 0o777;
        if actual != expected {
            return Err(EngineError::Security {
                expected,
                actual,
                path: path.to_path_buf(),
            });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, expected);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Create the storage directory if needed and assert its mode is 0700.
///
/// A pre-existing directory is never re-chmodded: a widened mode is a
/// tampering signal and fails with `Security`.
pub fn ensure_dir(dir: &Path) -> Result<(), EngineError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            EngineError::Initialization(format!(
                "cannot create storage directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        set_mode(dir, DIR_MODE)?;
    }
    verify_mode(dir, DIR_MODE)
}

// ---------------------------------------------------------------------------
// Keyfile
// ---------------------------------------------------------------------------

/// Return the 32 keyfile bytes, generating the file on first use.
///
/// An existing keyfile must carry mode 0400 exactly. A fresh keyfile is
/// written and then explicitly chmodded so the umask cannot widen it.
pub fn ensure_keyfile(dir: &Path) -> Result<[u8; crypto::SALT_LEN], EngineError> {
    let path = keyfile_path(dir);

    if path.exists() {
        verify_mode(&path, KEYFILE_MODE)?;
        let bytes = fs::read(&path)?;
        let bytes: [u8; crypto::SALT_LEN] = bytes.try_into().map_err(|_| {
            EngineError::Initialization(format!("keyfile {} is corrupted", path.display()))
        })?;
        return Ok(bytes);
    }

    let mut bytes = [0u8; crypto::SALT_LEN];
    crypto::fill_random(&mut bytes)?;
    write_new_keyfile(&path, &bytes).map_err(|e| {
        EngineError::Initialization(format!("cannot write keyfile {}: {}", path.display(), e))
    })?;
    // chmod after create: the creation mode is filtered through the umask.
    set_mode(&path, KEYFILE_MODE)?;
    Ok(bytes)
}

fn write_new_keyfile(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(KEYFILE_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)
}

// ---------------------------------------------------------------------------
// Meta file
// ---------------------------------------------------------------------------

/// Read the raw meta document, or `None` if it does not exist yet.
pub fn read_meta(dir: &Path) -> Result<Option<String>, EngineError> {
    match fs::read_to_string(meta_path(dir)) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write the meta document and pin it to mode 0600.
pub fn write_meta(dir: &Path, text: &str) -> Result<(), EngineError> {
    let path = meta_path(dir);
    fs::write(&path, text)?;
    set_mode(&path, DATA_MODE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
