//! End-to-end tests against real storage directories.

use std::path::{Path, PathBuf};

use secrets_engine::{OpenOptions, SecretsEngine};
use tempfile::TempDir;

fn store_dir() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("store");
    (tmp, dir)
}

async fn open_at(dir: &Path) -> SecretsEngine {
    SecretsEngine::open(OpenOptions::at(dir)).await.unwrap()
}

// === Fresh store layout ===

#[tokio::test]
async fn fresh_store_creates_expected_layout() {
    let (_tmp, dir) = store_dir();
    let store = open_at(&dir).await;

    assert!(dir.is_dir());
    assert!(dir.join(".keyfile").is_file());
    assert!(dir.join("store.db").is_file());
    assert!(dir.join("meta.json").is_file());
    assert_eq!(store.storage_path(), dir);

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["version"], "1");
    let salt = meta["salt"].as_str().unwrap();
    let integrity = meta["integrity"].as_str().unwrap();
    assert_eq!(salt.len(), 64);
    assert_eq!(integrity.len(), 64);
    assert!(salt.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(integrity.chars().all(|c| c.is_ascii_hexdigit()));
}

#[cfg(unix)]
#[tokio::test]
async fn fresh_store_pins_permission_modes() {
    use std::os::unix::fs::PermissionsExt;

    let (_tmp, dir) = store_dir();
    let _store = open_at(&dir).await;

    let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&dir), 0o700);
    assert_eq!(mode(&dir.join(".keyfile")), 0o400);
    assert_eq!(mode(&dir.join("store.db")), 0o600);
    assert_eq!(mode(&dir.join("meta.json")), 0o600);
}

// === Roundtrips ===

#[tokio::test]
async fn set_then_get_returns_value() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("openai.apiKey", "sk-abc123").await.unwrap();
    assert_eq!(
        store.get("openai.apiKey").await.unwrap().unwrap(),
        "sk-abc123"
    );
    assert!(store.has("openai.apiKey"));
    assert!(!store.has("openai.orgId"));
}

#[tokio::test]
async fn value_survives_close_and_reopen() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("openai.apiKey", "sk-abc123").await.unwrap();
    store.close().await.unwrap();

    let store = open_at(&dir).await;
    assert_eq!(
        store.get("openai.apiKey").await.unwrap().unwrap(),
        "sk-abc123"
    );
    assert_eq!(store.size(), 1);
}

#[tokio::test]
async fn empty_and_large_values_roundtrip() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("empty", "").await.unwrap();
    assert_eq!(store.get("empty").await.unwrap().unwrap(), "");

    let large = "x".repeat(10_000);
    store.set("large", &large).await.unwrap();
    assert_eq!(store.get("large").await.unwrap().unwrap(), large);

    let unicode = "välue-日本語-🔐";
    store.set("unicode.näme", unicode).await.unwrap();
    assert_eq!(store.get("unicode.näme").await.unwrap().unwrap(), unicode);
}

#[tokio::test]
async fn overwrite_replaces_value_without_growing() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("k", "v1").await.unwrap();
    store.set("k", "v2").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().unwrap(), "v2");
    assert_eq!(store.size(), 1);
}

#[tokio::test]
async fn missing_name_is_none_and_required_is_error() {
    let (_tmp, dir) = store_dir();
    let store = open_at(&dir).await;

    assert!(store.get("absent").await.unwrap().is_none());
    let err = store.get_required("absent").await.unwrap_err();
    assert_eq!(err.code(), "KEY_NOT_FOUND");
    assert!(err.to_string().contains("absent"));
}

// === Listing and deletion ===

#[tokio::test]
async fn keys_lists_sorted_and_delete_shrinks() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("c", "3").await.unwrap();
    store.set("a", "1").await.unwrap();
    store.set("b", "2").await.unwrap();

    assert_eq!(store.keys(None), vec!["a", "b", "c"]);
    assert_eq!(store.keys(Some("*")), vec!["a", "b", "c"]);
    assert_eq!(store.size(), 3);

    assert!(store.delete("b").await.unwrap());
    assert!(!store.delete("b").await.unwrap());
    assert_eq!(store.keys(None), vec!["a", "c"]);
    assert_eq!(store.size(), 2);
    assert!(store.get("b").await.unwrap().is_none());
    assert!(!store.has("b"));
}

#[tokio::test]
async fn keys_sorts_by_code_point() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("b", "1").await.unwrap();
    store.set("C", "2").await.unwrap();
    store.set("a", "3").await.unwrap();
    assert_eq!(store.keys(None), vec!["C", "a", "b"]);
}

#[tokio::test]
async fn glob_filters_within_segments() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;

    store.set("openai.apiKey", "1").await.unwrap();
    store.set("openai.orgId", "2").await.unwrap();
    store.set("anthropic.apiKey", "3").await.unwrap();
    store.set("openai.nested.key", "4").await.unwrap();

    assert_eq!(
        store.keys(Some("openai.*")),
        vec!["openai.apiKey", "openai.orgId"]
    );
    assert_eq!(
        store.keys(Some("*.apiKey")),
        vec!["anthropic.apiKey", "openai.apiKey"]
    );
    // No stored name equals the bare literal.
    assert!(store.keys(Some("openai")).is_empty());
}

// === Integrity ===

#[tokio::test]
async fn tampered_database_file_fails_open() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.close().await.unwrap();

    // Overwrite one byte near the end of the main database file.
    let db = dir.join("store.db");
    let mut bytes = std::fs::read(&db).unwrap();
    let pos = bytes.len() - 50;
    bytes[pos] ^= 0xFF;
    std::fs::write(&db, &bytes).unwrap();

    let err = SecretsEngine::open(OpenOptions::at(&dir)).await.unwrap_err();
    assert_eq!(err.code(), "INTEGRITY_ERROR");
}

#[tokio::test]
async fn external_wal_checkpoint_does_not_break_reopen() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.close().await.unwrap();

    // A third party (or the platform) checkpoints the database behind the
    // store's back.
    {
        let conn = rusqlite::Connection::open(dir.join("store.db")).unwrap();
        let _busy: i64 = conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))
            .unwrap();
    }

    let store = open_at(&dir).await;
    assert_eq!(store.get("k").await.unwrap().unwrap(), "v");
}

#[tokio::test]
async fn tampered_value_ciphertext_fails_get() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();

    // Corrupt the stored value ciphertext behind the engine's back.
    {
        let conn = rusqlite::Connection::open(dir.join("store.db")).unwrap();
        conn.execute(
            "UPDATE secrets SET cipher = zeroblob(length(cipher))",
            [],
        )
        .unwrap();
    }

    let err = store.get("k").await.unwrap_err();
    assert_eq!(err.code(), "DECRYPTION_ERROR");
}

#[tokio::test]
async fn foreign_row_is_skipped_on_reopen() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("good", "value").await.unwrap();

    // Inject a row whose name ciphertext cannot be decrypted, then close
    // (which re-seals over the polluted file).
    {
        let conn = rusqlite::Connection::open(dir.join("store.db")).unwrap();
        conn.execute(
            "INSERT INTO secrets (key_hash, key_enc, iv, cipher, created, updated)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            rusqlite::params![
                "ff".repeat(32),
                vec![0u8; 40],
                vec![0u8; 12],
                vec![0u8; 20]
            ],
        )
        .unwrap();
    }
    store.close().await.unwrap();

    // The store still opens; the undecryptable entry is invisible.
    let store = open_at(&dir).await;
    assert_eq!(store.keys(None), vec!["good"]);
    assert_eq!(store.size(), 1);
}

// === Permission enforcement ===

#[cfg(unix)]
#[tokio::test]
async fn widened_directory_mode_fails_open() {
    use std::os::unix::fs::PermissionsExt;

    use secrets_engine::EngineError;

    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.close().await.unwrap();

    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

    let err = SecretsEngine::open(OpenOptions::at(&dir)).await.unwrap_err();
    assert_eq!(err.code(), "SECURITY_ERROR");
    match err {
        EngineError::Security {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0o700);
            assert_eq!(actual, 0o755);
        }
        other => panic!("unexpected error: {}", other),
    }
}

// === Lifecycle ===

#[tokio::test]
async fn close_is_idempotent() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;
    store.close().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
#[should_panic(expected = "instance is closed")]
async fn use_after_close_panics() {
    let (_tmp, dir) = store_dir();
    let mut store = open_at(&dir).await;
    store.close().await.unwrap();
    let _ = store.has("k");
}

#[tokio::test]
async fn seal_after_close_matches_recomputation() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.close().await.unwrap();

    // Closing and reopening an unchanged store always verifies.
    let mut store = open_at(&dir).await;
    store.close().await.unwrap();
    let store = open_at(&dir).await;
    assert_eq!(store.get("k").await.unwrap().unwrap(), "v");
}

#[tokio::test]
async fn destroy_removes_directory() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.destroy().await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn destroy_after_close_removes_directory() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("k", "v").await.unwrap();
    store.close().await.unwrap();
    store.destroy().await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn destroyed_store_can_be_recreated() {
    let (_tmp, dir) = store_dir();

    let mut store = open_at(&dir).await;
    store.set("old", "1").await.unwrap();
    store.destroy().await.unwrap();

    let mut store = open_at(&dir).await;
    assert_eq!(store.size(), 0);
    store.set("new", "2").await.unwrap();
    assert_eq!(store.keys(None), vec!["new"]);
}
