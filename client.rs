//! Transfer orchestration.
//!
//! [`Client`] composes a [`Hasher`], a [`Store`] and, in encrypted mode, a
//! [`Cipher`] into two fail-fast pipelines:
//!
//! ```text
//! put, plain:      hash(local) -> upload(local)
//! put, encrypted:  encrypt(local -> staged) -> hash(staged) -> upload(staged)
//! get, plain:      download(local) -> verify(local)
//! get, encrypted:  download(staged) -> verify(staged) -> decrypt(staged -> local)
//! ```
//!
//! The checksum always describes the artifact actually stored remotely
//! (ciphertext when encrypted), and verification on download runs against
//! that same form, before any decryption work.

use crate::cipher::Cipher;
use crate::error::S3BackupError;
use crate::hash::{Checksum, Hasher};
use crate::store::Store;
use crate::util;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Suffix of the local file holding the intermediate form during
/// encrypt/decrypt
pub const STAGING_SUFFIX: &str = ".tmp";

/// Local path of the intermediate artifact for `local`
pub fn staging_path(local: &Path) -> PathBuf {
    util::with_suffix(local, STAGING_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encrypt,
    Hash,
    Upload,
    Download,
    Verify,
    Decrypt,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Encrypt => "encrypt",
            Stage::Hash => "hash",
            Stage::Upload => "upload",
            Stage::Download => "download",
            Stage::Verify => "verify",
            Stage::Decrypt => "decrypt",
        };
        f.write_str(name)
    }
}

/// A collaborator failure tagged with the pipeline stage it happened in
#[derive(Debug, Error)]
#[error("{stage} failed")]
pub struct TransferError {
    pub stage: Stage,
    #[source]
    pub source: S3BackupError,
}

impl TransferError {
    pub fn new(stage: Stage, source: S3BackupError) -> Self {
        Self { stage, source }
    }
}

trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T, TransferError>;
}

impl<T> StageExt<T> for Result<T, S3BackupError> {
    fn stage(self, stage: Stage) -> Result<T, TransferError> {
        self.map_err(|source| TransferError::new(stage, source))
    }
}

/// What was agreed between the local file and the remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub local: PathBuf,
    pub remote: String,
    pub checksum: Checksum,
}

/// Transfer pipeline, fixed at construction
pub enum Mode {
    Plain,
    Encrypted(Box<dyn Cipher>),
}

pub struct Client {
    hasher: Box<dyn Hasher>,
    store: Box<dyn Store>,
    mode: Mode,
}

impl Client {
    pub fn plain(hasher: impl Hasher + 'static, store: impl Store + 'static) -> Self {
        Self {
            hasher: Box::new(hasher),
            store: Box::new(store),
            mode: Mode::Plain,
        }
    }

    pub fn encrypted(
        hasher: impl Hasher + 'static,
        store: impl Store + 'static,
        cipher: impl Cipher + 'static,
    ) -> Self {
        Self {
            hasher: Box::new(hasher),
            store: Box::new(store),
            mode: Mode::Encrypted(Box::new(cipher)),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.mode, Mode::Encrypted(_))
    }

    /// Publish the file at `local` to `remote`
    pub async fn put_local_file(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<TransferRecord, TransferError> {
        let local = local.as_ref();
        debug!(remote, local = %local.display(), encrypted = self.is_encrypted(), "put started");

        let checksum = match &self.mode {
            Mode::Plain => self.hash_and_upload(remote, local).await?,
            Mode::Encrypted(cipher) => {
                let staged = staging_path(local);
                let result = self.encrypt_and_upload(cipher.as_ref(), remote, local, &staged).await;
                util::remove_if_exists(&staged).await;
                result?
            }
        };

        info!(remote, local = %local.display(), %checksum, "put complete");
        Ok(TransferRecord {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            checksum,
        })
    }

    /// Retrieve `remote` into `local`, verified and decrypted when configured
    pub async fn get_remote_file(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<TransferRecord, TransferError> {
        let local = local.as_ref();
        debug!(remote, local = %local.display(), encrypted = self.is_encrypted(), "get started");

        let checksum = match &self.mode {
            Mode::Plain => self.download_and_verify(remote, local).await?,
            Mode::Encrypted(cipher) => {
                let staged = staging_path(local);
                let result = self.download_and_decrypt(cipher.as_ref(), remote, local, &staged).await;
                util::remove_if_exists(&staged).await;
                result?
            }
        };

        info!(remote, local = %local.display(), %checksum, "get complete");
        Ok(TransferRecord {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            checksum,
        })
    }

    async fn hash_and_upload(&self, remote: &str, path: &Path) -> Result<Checksum, TransferError> {
        let checksum = self.hasher.calculate(path).await.stage(Stage::Hash)?;
        self.store
            .upload_file(remote, path, &checksum)
            .await
            .stage(Stage::Upload)?;
        Ok(checksum)
    }

    async fn encrypt_and_upload(
        &self,
        cipher: &dyn Cipher,
        remote: &str,
        local: &Path,
        staged: &Path,
    ) -> Result<Checksum, TransferError> {
        cipher.encrypt(local, staged).await.stage(Stage::Encrypt)?;
        self.hash_and_upload(remote, staged).await
    }

    async fn download_and_verify(&self, remote: &str, path: &Path) -> Result<Checksum, TransferError> {
        let checksum = self
            .store
            .download_file(remote, path)
            .await
            .stage(Stage::Download)?;
        if let Err(e) = self.hasher.verify(path, &checksum).await {
            // a failed verification leaves nothing at `path`
            util::remove_if_exists(path).await;
            return Err(TransferError::new(Stage::Verify, e));
        }
        Ok(checksum)
    }

    async fn download_and_decrypt(
        &self,
        cipher: &dyn Cipher,
        remote: &str,
        local: &Path,
        staged: &Path,
    ) -> Result<Checksum, TransferError> {
        let checksum = self.download_and_verify(remote, staged).await?;
        cipher.decrypt(staged, local).await.stage(Stage::Decrypt)?;
        Ok(checksum)
    }
}
