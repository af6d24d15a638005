//! # secrets-engine
//!
//! A machine-bound local secret store. Name/value string pairs are
//! persisted in a WAL-mode SQLite file with both names and values
//! encrypted, under a master key derived from the machine identity, an
//! on-disk keyfile and a per-store salt. A keyed integrity seal over the
//! database file makes offline tampering detectable on the next open.
//!
//! There is no passphrase and no external service: copying the storage
//! directory to another machine (or another user) yields nothing
//! decryptable.
//!
//! ## Quick Start
//!
//! ```ignore
//! use secrets_engine::{OpenOptions, SecretsEngine};
//!
//! # tokio_test::block_on(async {
//! let mut store = SecretsEngine::open(OpenOptions::default()).await.unwrap();
//!
//! store.set("openai.apiKey", "sk-abc123").await.unwrap();
//! assert_eq!(store.get("openai.apiKey").await.unwrap().unwrap(), "sk-abc123");
//!
//! assert_eq!(store.keys(Some("openai.*")), vec!["openai.apiKey"]);
//!
//! store.close().await.unwrap();
//! # });
//! ```
//!
//! ## What's NOT provided
//!
//! - Protection against a privileged attacker on the live machine
//! - Multi-process or multi-thread concurrent writers
//! - Key rotation or cross-machine secret sharing

pub mod crypto;
pub mod engine;
pub mod error;
pub mod fsguard;
pub mod glob;
pub mod identity;
pub mod paths;
pub mod rows;
pub mod seal;

// Re-export main types for convenience
pub use engine::{OpenOptions, SecretsEngine};
pub use error::EngineError;
pub use paths::StoreLocation;
pub use seal::MetaDocument;
