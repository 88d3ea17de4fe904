//! Parsing of `scheme://container/key` remote locators.

use crate::error::{Result, S3BackupError};
use std::fmt;

/// A remote object address split into its container (bucket) and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocator {
    scheme: String,
    container: String,
    key: String,
}

impl RemoteLocator {
    /// Parse `locator`, accepting only the given scheme.
    ///
    /// The key may contain `/`; the container may not. Both must be non-empty.
    pub fn parse(locator: &str, scheme: &str) -> Result<Self> {
        let (found_scheme, rest) = locator
            .split_once("://")
            .ok_or_else(|| S3BackupError::malformed_locator(locator, "missing scheme"))?;

        if found_scheme != scheme {
            return Err(S3BackupError::malformed_locator(
                locator,
                "unrecognized scheme",
            ));
        }

        let (container, key) = rest
            .split_once('/')
            .ok_or_else(|| S3BackupError::malformed_locator(locator, "missing object key"))?;

        if container.is_empty() {
            return Err(S3BackupError::malformed_locator(locator, "empty container"));
        }
        if key.is_empty() {
            return Err(S3BackupError::malformed_locator(locator, "missing object key"));
        }
        if key.ends_with('/') {
            return Err(S3BackupError::malformed_locator(locator, "key names a directory"));
        }

        Ok(Self {
            scheme: found_scheme.to_string(),
            container: container.to_string(),
            key: key.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.key)
    }
}
