//! # s3backup - Verified, optionally encrypted, object store transfers
//!
//! s3backup moves single files between local disk and a remote object store.
//! Every upload records a checksum of the stored artifact with the object,
//! and every download verifies the fetched artifact against it before
//! anything else happens.
//!
//! ## Features
//!
//! - **Integrity**: SHA-256 checksum recorded at upload, verified at download
//! - **Encryption**: optional chunked XChaCha20-Poly1305 file encryption
//! - **Backends**: S3 and S3-compatible endpoints via OpenDAL, plus an
//!   in-memory store
//! - **Pluggable collaborators**: hasher, cipher and store are traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use s3backup::{
//!     client::Client, hash::Sha256Hasher, key_manager::KeyManager,
//!     store::{OpendalStore, S3Config},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = OpendalStore::s3(S3Config {
//!         region: "us-east-1".into(),
//!         ..Default::default()
//!     });
//!     let km = KeyManager::load("./backup.key").await?;
//!     let client = Client::encrypted(Sha256Hasher, store, km.stream_cipher());
//!
//!     client.put_local_file("s3://my-bucket/db.dump", "db.dump").await?;
//!     client.get_remote_file("s3://my-bucket/db.dump", "restored.dump").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipelines
//!
//! - **Plain**: hash, upload / download, verify
//! - **Encrypted**: encrypt to `<file>.tmp`, hash, upload / download to
//!   `<file>.tmp`, verify, decrypt

pub mod cipher;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod key_manager;
pub mod locator;
pub mod store;
pub mod util;

// Re-export common types for convenience
pub use client::{Client, Stage, TransferError, TransferRecord};
pub use error::S3BackupError;
pub use hash::Checksum;
