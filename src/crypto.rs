//! Crypto primitives: scrypt KDF, AES-256-GCM, HMAC-SHA256, SHA-256, CSPRNG.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;
use hmac::{Hmac, Mac};
use scrypt::Params;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EngineError;

type HmacSha256 = Hmac<Sha256>;

/// AEAD IV length in bytes.
pub const IV_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Salt and keyfile length in bytes.
pub const SALT_LEN: usize = 32;

/// scrypt cost: N = 2^17, r = 8, p = 1 (~128 MiB working memory).
const SCRYPT_LOG_N: u8 = 17;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The 32-byte master key. Zeroed on drop; never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Derive the master key from the machine identity, the on-disk keyfile
/// and the store salt: `scrypt(machine_id || keyfile, salt)`.
///
/// Deterministic: the same three inputs always yield the same key.
pub fn derive_master_key(
    machine_id: &str,
    keyfile: &[u8; SALT_LEN],
    salt: &[u8; SALT_LEN],
) -> Result<MasterKey, EngineError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|e| EngineError::Initialization(format!("scrypt parameters rejected: {}", e)))?;

    let mut password = Vec::with_capacity(machine_id.len() + keyfile.len());
    password.extend_from_slice(machine_id.as_bytes());
    password.extend_from_slice(keyfile);

    let mut out = [0u8; 32];
    let derived = scrypt::scrypt(&password, salt, &params, &mut out)
        .map_err(|e| EngineError::Initialization(format!("scrypt derivation failed: {}", e)));
    password.zeroize();
    derived?;

    Ok(MasterKey(out))
}

// ---------------------------------------------------------------------------
// AEAD
// ---------------------------------------------------------------------------

/// Encrypt a UTF-8 string under a fresh random IV.
///
/// Returns `(iv, ciphertext)` where the 16-byte GCM tag is appended to the
/// ciphertext. No associated data is bound.
pub fn encrypt(key: &MasterKey, plaintext: &str) -> Result<([u8; IV_LEN], Vec<u8>), EngineError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| EngineError::Initialization("AES key setup failed".into()))?;

    let mut iv = [0u8; IV_LEN];
    getrandom(&mut iv)
        .map_err(|e| EngineError::Initialization(format!("entropy source unavailable: {}", e)))?;

    let payload = Payload {
        msg: plaintext.as_bytes(),
        aad: b"",
    };
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), payload)
        .map_err(|_| EngineError::Initialization("AEAD seal failed".into()))?;

    Ok((iv, ciphertext))
}

/// Decrypt `data` (ciphertext with appended tag) and return the plaintext
/// string. `key_hash` is threaded into the error for diagnostics only.
pub fn decrypt(
    key: &MasterKey,
    iv: &[u8],
    data: &[u8],
    key_hash: Option<&str>,
) -> Result<String, EngineError> {
    if data.len() < TAG_LEN {
        return Err(decryption_error("ciphertext shorter than auth tag", key_hash));
    }
    if iv.len() != IV_LEN {
        return Err(decryption_error("unexpected IV length", key_hash));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| EngineError::Initialization("AES key setup failed".into()))?;

    let payload = Payload { msg: data, aad: b"" };
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), payload)
        .map_err(|_| decryption_error("authentication tag mismatch", key_hash))?;

    String::from_utf8(plaintext)
        .map_err(|_| decryption_error("plaintext is not valid UTF-8", key_hash))
}

fn decryption_error(reason: &str, key_hash: Option<&str>) -> EngineError {
    EngineError::Decryption {
        key_hash: key_hash.map(|h| h.chars().take(16).collect()),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// MAC / hash / randomness
// ---------------------------------------------------------------------------

/// HMAC-SHA256 under the master key, raw 32 bytes.
pub fn hmac(key: &MasterKey, data: &[u8]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 under the master key, lowercase hex (64 chars).
pub fn hmac_hex(key: &MasterKey, data: &[u8]) -> String {
    hex::encode(hmac(key, data))
}

/// Plain SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Fill a buffer from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), EngineError> {
    getrandom(buf)
        .map_err(|e| EngineError::Initialization(format!("entropy source unavailable: {}", e)))
}

/// Fresh random 32-byte salt.
pub fn random_salt() -> Result<[u8; SALT_LEN], EngineError> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
