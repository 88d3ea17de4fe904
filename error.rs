use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error taxonomy shared by the hasher, cipher and store collaborators.
#[derive(Debug, Error)]
pub enum S3BackupError {
    /// Remote locator does not have the `scheme://container/key` shape
    #[error("malformed remote locator {locator:?}: {reason}")]
    MalformedLocator {
        locator: String,
        reason: &'static str,
    },

    /// Reading, writing or creating a local file failed
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network, authentication or missing-object failures from the backend
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote object exists but no checksum was recorded with it
    #[error("no checksum recorded for {0}")]
    MissingChecksum(String),

    /// Content does not hash to the checksum recorded at upload time
    #[error("checksum mismatch for {}: expected {expected}, calculated {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("encryption error: {0}")]
    Encryption(String),

    /// Includes authentication failures of tampered ciphertext
    #[error("decryption error: {0}")]
    Decryption(String),
}

impl S3BackupError {
    pub fn malformed_locator(locator: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedLocator {
            locator: locator.into(),
            reason,
        }
    }

    pub fn local_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    /// True for the integrity failure, as opposed to any I/O problem
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}

impl From<opendal::Error> for S3BackupError {
    fn from(err: opendal::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

pub type Result<T, E = S3BackupError> = std::result::Result<T, E>;
