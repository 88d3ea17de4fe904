//! Symmetric key files for the encrypted transfer pipeline.
//!
//! This module provides [`KeyManager`] for generating and loading 256-bit
//! XChaCha20-Poly1305 keys with automatic memory zeroization.
//!
//! ## Security Features
//!
//! - Keys are zeroized on drop (via `Zeroize` trait)
//! - Unix file permissions set to 0600 (owner read/write only)
//! - Cryptographically secure random generation via `OsRng`
//! - Loading never creates a key: a typo in a key path must not silently
//!   produce uploads nobody can decrypt

use crate::cipher::StreamCipher;
use anyhow::{bail, Context, Result};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305};
use rand_core::OsRng;
use rand_core::RngCore;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;

pub struct KeyManager {
    key_bytes: [u8; KEY_LEN],
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl KeyManager {
    /// Load an existing key file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading encryption key");

        let mut data = fs::read(path)
            .await
            .with_context(|| format!("reading key from {}", path.display()))?;
        if data.len() != KEY_LEN {
            warn!(path = %path.display(), found_bytes = data.len(), "invalid key size");
            let found = data.len();
            data.zeroize();
            bail!(
                "expected {}-byte key at {} but found {} bytes",
                KEY_LEN,
                path.display(),
                found
            );
        }

        let mut key_bytes = [0u8; KEY_LEN];
        key_bytes.copy_from_slice(&data);
        data.zeroize();
        Ok(Self { key_bytes })
    }

    /// Generate a fresh random key and write it to `path`.
    /// Refuses to overwrite an existing file.
    pub async fn generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "generating new encryption key");

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        #[cfg(unix)]
        {
            let path_buf = path.to_path_buf();
            let mut key_clone = key;
            tokio::task::spawn_blocking(move || {
                use std::fs::OpenOptions;
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;

                let result = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(&path_buf)
                    .and_then(|mut f| f.write_all(&key_clone));
                key_clone.zeroize();
                result.with_context(|| format!("writing key to {}", path_buf.display()))
            })
            .await??;
        }
        #[cfg(not(unix))]
        {
            if fs::try_exists(path).await.unwrap_or(false) {
                bail!("key file {} already exists", path.display());
            }
            fs::write(path, &key)
                .await
                .with_context(|| format!("writing key to {}", path.display()))?;
        }

        Ok(Self { key_bytes: key })
    }

    pub fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key_bytes))
    }

    /// File cipher bound to this key
    pub fn stream_cipher(&self) -> StreamCipher {
        StreamCipher::new(self.cipher())
    }
}
