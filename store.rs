//! Remote object storage behind the [`Store`] trait.
//!
//! [`OpendalStore`] talks to S3 (or any S3-compatible endpoint) through an
//! OpenDAL operator, or to a process-local in-memory backend. The checksum
//! handed to [`Store::upload_file`] is recorded with the object so that
//! [`Store::download_file`] can return it without recomputing anything:
//!
//! - on S3 as object user metadata (`x-amz-meta-checksum`)
//! - in memory in a separate per-container namespace keyed by object key,
//!   which no locator can address
//!
//! A download of an object without a recorded checksum fails with
//! [`S3BackupError::MissingChecksum`] before any content is fetched.

use crate::error::{Result, S3BackupError};
use crate::hash::Checksum;
use crate::locator::RemoteLocator;
use crate::util;
use async_trait::async_trait;
use opendal::{ErrorKind, Metadata, Operator};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Bytes moved per write call / ranged read
const TRANSFER_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// User metadata key holding the checksum
pub const CHECKSUM_METADATA_KEY: &str = "checksum";

pub const S3_SCHEME: &str = "s3";
pub const MEMORY_SCHEME: &str = "mem";

#[async_trait]
pub trait Store: Send + Sync {
    /// Transfer `local` to `remote` and durably associate `checksum` with it
    async fn upload_file(&self, remote: &str, local: &Path, checksum: &Checksum) -> Result<()>;

    /// Fetch `remote` into `local`, returning the checksum recorded at upload
    async fn download_file(&self, remote: &str, local: &Path) -> Result<Checksum>;
}

/// Connection settings for an S3-compatible backend
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint (MinIO, SeaweedFS, ...); AWS when unset
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

enum Backend {
    S3(S3Config),
    Memory,
}

/// Where the checksums of one container are kept
#[derive(Clone)]
enum ChecksumIndex {
    UserMetadata,
    /// Own operator, disjoint from the object namespace
    Separate(Operator),
}

#[derive(Clone)]
struct Container {
    objects: Operator,
    checksums: ChecksumIndex,
}

pub struct OpendalStore {
    scheme: &'static str,
    backend: Backend,
    /// Built on first use of each container
    containers: Mutex<HashMap<String, Container>>,
}

impl OpendalStore {
    /// Store for `s3://bucket/key` locators
    pub fn s3(cfg: S3Config) -> Self {
        if let Some(endpoint) = cfg.endpoint.as_deref() {
            if endpoint.starts_with("http://") {
                warn!(
                    endpoint,
                    "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
                );
            }
        }
        Self::with_backend(S3_SCHEME, Backend::S3(cfg))
    }

    /// Process-local store for `mem://container/key` locators.
    /// Contents live as long as this value.
    pub fn memory() -> Self {
        Self::with_backend(MEMORY_SCHEME, Backend::Memory)
    }

    fn with_backend(scheme: &'static str, backend: Backend) -> Self {
        Self {
            scheme,
            backend,
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// Parse a locator for this store without touching the backend
    pub fn parse_locator(&self, remote: &str) -> Result<RemoteLocator> {
        RemoteLocator::parse(remote, self.scheme)
    }

    fn container(&self, name: &str) -> Result<Container> {
        let mut containers = self
            .containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(container) = containers.get(name) {
            return Ok(container.clone());
        }

        let container = match &self.backend {
            Backend::S3(cfg) => Container {
                objects: build_s3_operator(cfg, name)?,
                checksums: ChecksumIndex::UserMetadata,
            },
            Backend::Memory => Container {
                objects: memory_operator()?,
                checksums: ChecksumIndex::Separate(memory_operator()?),
            },
        };
        debug!(scheme = self.scheme, container = name, "built storage operator");
        containers.insert(name.to_string(), container.clone());
        Ok(container)
    }
}

fn build_s3_operator(cfg: &S3Config, bucket: &str) -> Result<Operator> {
    let mut builder = opendal::services::S3::default()
        .bucket(bucket)
        .region(&cfg.region);
    if let Some(endpoint) = cfg.endpoint.as_deref() {
        builder = builder.endpoint(endpoint);
    }
    if let Some(access_key_id) = cfg.access_key_id.as_deref() {
        builder = builder.access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key.as_deref() {
        builder = builder.secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token.as_deref() {
        builder = builder.session_token(session_token);
    }

    let op = Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())?.finish())
}

/// User metadata recording `checksum` on an object
fn checksum_metadata(checksum: &Checksum) -> HashMap<String, String> {
    HashMap::from([(CHECKSUM_METADATA_KEY.to_string(), checksum.to_string())])
}

/// Checksum recorded in an object's user metadata, if any
fn checksum_from_metadata(meta: &Metadata) -> Option<Checksum> {
    meta.user_metadata()
        .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
        .filter(|value| !value.is_empty())
        .map(|value| Checksum::new(value.as_str()))
}

impl Container {
    async fn recorded_checksum(&self, key: &str, meta: &Metadata) -> Result<Option<Checksum>> {
        match &self.checksums {
            ChecksumIndex::UserMetadata => Ok(checksum_from_metadata(meta)),
            ChecksumIndex::Separate(index) => match index.read(key).await {
                Ok(buf) => {
                    let value = String::from_utf8_lossy(&buf.to_vec()).trim().to_string();
                    Ok((!value.is_empty()).then(|| Checksum::new(value)))
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }
}

#[async_trait]
impl Store for OpendalStore {
    async fn upload_file(&self, remote: &str, local: &Path, checksum: &Checksum) -> Result<()> {
        let locator = self.parse_locator(remote)?;
        let mut file = fs::File::open(local)
            .await
            .map_err(|e| S3BackupError::local_io(local, e))?;

        let container = self.container(locator.container())?;
        let op = &container.objects;
        debug!(remote = %locator, local = %local.display(), "uploading file");

        let mut writer = match &container.checksums {
            ChecksumIndex::UserMetadata => {
                op.writer_with(locator.key())
                    .user_metadata(checksum_metadata(checksum))
                    .await?
            }
            ChecksumIndex::Separate(_) => op.writer(locator.key()).await?,
        };

        let mut buffer = vec![0u8; TRANSFER_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match file.read(&mut buffer).await {
                Ok(n) => n,
                Err(e) => {
                    if let Err(abort_err) = writer.abort().await {
                        warn!(remote = %locator, error = %abort_err, "failed to abort upload");
                    }
                    return Err(S3BackupError::local_io(local, e));
                }
            };
            if n == 0 {
                break;
            }
            writer.write(buffer[..n].to_vec()).await?;
            total += n as u64;
        }
        writer.close().await?;

        if let ChecksumIndex::Separate(index) = &container.checksums {
            index
                .write(locator.key(), checksum.as_str().as_bytes().to_vec())
                .await?;
        }

        info!(remote = %locator, bytes = total, %checksum, "upload complete");
        Ok(())
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<Checksum> {
        let locator = self.parse_locator(remote)?;
        let container = self.container(locator.container())?;
        let op = &container.objects;

        let meta = op.stat(locator.key()).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                S3BackupError::remote(format!("object not found: {locator}"))
            } else {
                e.into()
            }
        })?;
        let checksum = container
            .recorded_checksum(locator.key(), &meta)
            .await?
            .ok_or_else(|| S3BackupError::MissingChecksum(locator.to_string()))?;
        let size = meta.content_length();
        debug!(remote = %locator, local = %local.display(), size, "downloading file");

        // an existing file at `local` is only replaced by a complete download
        let partial = util::with_suffix(local, util::PARTIAL_SUFFIX);
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| S3BackupError::local_io(&partial, e))?;

        let outcome = async {
            let reader = op.reader(locator.key()).await?;
            let mut offset = 0u64;
            while offset < size {
                let end = (offset + TRANSFER_CHUNK_SIZE as u64).min(size);
                let chunk = reader.read(offset..end).await?;
                if chunk.is_empty() {
                    return Err(S3BackupError::remote(format!(
                        "object {locator} ended at {offset} of {size} bytes"
                    )));
                }
                file.write_all(&chunk.to_vec())
                    .await
                    .map_err(|e| S3BackupError::local_io(&partial, e))?;
                offset += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| S3BackupError::local_io(&partial, e))?;
            file.sync_all()
                .await
                .map_err(|e| S3BackupError::local_io(&partial, e))?;
            Ok::<u64, S3BackupError>(offset)
        }
        .await;
        drop(file);

        let outcome = match outcome {
            Ok(bytes) => fs::rename(&partial, local)
                .await
                .map(|_| bytes)
                .map_err(|e| S3BackupError::local_io(local, e)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(bytes) => {
                info!(remote = %locator, bytes, %checksum, "download complete");
                Ok(checksum)
            }
            Err(e) => {
                util::remove_if_exists(&partial).await;
                Err(e)
            }
        }
    }
}
