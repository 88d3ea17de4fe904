//! Content checksums for local files.
//!
//! [`Sha256Hasher`] streams a file through SHA-256 and renders the digest as
//! lowercase hex. The checksum is an integrity check only: it detects
//! corruption between upload and download, it does not authenticate anyone.

use crate::error::{Result, S3BackupError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Opaque content-derived integrity token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Checksum {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Checksum {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[async_trait]
pub trait Hasher: Send + Sync {
    /// Deterministic function of the file content only
    async fn calculate(&self, path: &Path) -> Result<Checksum>;

    /// Recompute and compare. A mismatch is reported as
    /// [`S3BackupError::ChecksumMismatch`], never as an I/O error.
    async fn verify(&self, path: &Path, expected: &Checksum) -> Result<()> {
        let actual = self.calculate(path).await?;
        if &actual != expected {
            return Err(S3BackupError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

#[async_trait]
impl Hasher for Sha256Hasher {
    async fn calculate(&self, path: &Path) -> Result<Checksum> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| S3BackupError::local_io(path, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| S3BackupError::local_io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            total += n as u64;
        }

        let checksum = Checksum::new(hex::encode(hasher.finalize()));
        debug!(path = %path.display(), bytes = total, %checksum, "checksum calculated");
        Ok(checksum)
    }
}
