//! File-to-file encryption with chunked XChaCha20-Poly1305.
//!
//! [`StreamCipher`] never holds a whole file in memory. Output is written to
//! a `.partial` sibling of the destination and renamed into place only after
//! every chunk succeeded, so a failed run never leaves a destination file
//! that looks valid.
//!
//! ## File Format
//!
//! ```text
//! [version:1][chunk0][chunk1]...
//!
//! Each chunk:
//! [nonce:24][last:1][length:4][encrypted_data]
//! ```
//!
//! Every chunk is authenticated with `version || index || last` as AAD, so
//! reordered, dropped or appended chunks fail decryption. An empty input
//! encodes as a single empty final chunk.

use crate::error::{Result, S3BackupError};
use crate::util;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, AeadCore, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

/// Plaintext bytes per chunk (64KB)
const CHUNK_SIZE: usize = 64 * 1024;

/// Poly1305 tag appended to every chunk
const TAG_SIZE: usize = 16;

pub const FORMAT_VERSION: u8 = 1;


#[async_trait]
pub trait Cipher: Send + Sync {
    /// Encrypt `plain` into a new file at `cipher`
    async fn encrypt(&self, plain: &Path, cipher: &Path) -> Result<()>;

    /// Decrypt `cipher` into a new file at `plain`
    async fn decrypt(&self, cipher: &Path, plain: &Path) -> Result<()>;
}

fn chunk_aad(index: u64, last: bool) -> [u8; 10] {
    let mut aad = [0u8; 10];
    aad[0] = FORMAT_VERSION;
    aad[1..9].copy_from_slice(&index.to_be_bytes());
    aad[9] = last as u8;
    aad
}

/// Fill `buf` as far as the reader allows. Returns fewer bytes than the
/// buffer length only at EOF.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub struct StreamCipher {
    cipher: XChaCha20Poly1305,
}

impl StreamCipher {
    pub fn new(cipher: XChaCha20Poly1305) -> Self {
        Self { cipher }
    }

    /// Encrypts everything from `reader` into `writer`.
    /// Returns the number of plaintext bytes consumed.
    pub async fn encrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io_err = |e: std::io::Error| S3BackupError::encryption(e.to_string());

        writer.write_u8(FORMAT_VERSION).await.map_err(io_err)?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut index = 0u64;
        let mut total_bytes = 0u64;

        loop {
            let n = read_full(reader, &mut buffer).await.map_err(io_err)?;
            let last = n < CHUNK_SIZE;

            let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
            let aad = chunk_aad(index, last);
            let ciphertext = self
                .cipher
                .encrypt(
                    &nonce,
                    Payload {
                        msg: &buffer[..n],
                        aad: &aad,
                    },
                )
                .map_err(|e| S3BackupError::encryption(format!("chunk {index}: {e}")))?;

            writer.write_all(&nonce).await.map_err(io_err)?;
            writer.write_u8(last as u8).await.map_err(io_err)?;
            writer
                .write_u32(ciphertext.len() as u32)
                .await
                .map_err(io_err)?;
            writer.write_all(&ciphertext).await.map_err(io_err)?;

            total_bytes += n as u64;
            index += 1;
            if last {
                break;
            }
        }

        writer.flush().await.map_err(io_err)?;
        Ok(total_bytes)
    }

    /// Decrypts the chunk stream from `reader` into `writer`.
    /// Returns the number of plaintext bytes produced.
    pub async fn decrypt_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io_err = |e: std::io::Error| S3BackupError::decryption(e.to_string());

        let version = reader
            .read_u8()
            .await
            .map_err(|e| S3BackupError::decryption(format!("reading version byte: {e}")))?;
        if version != FORMAT_VERSION {
            return Err(S3BackupError::decryption(format!(
                "unsupported file format version: {version}"
            )));
        }

        let mut total_bytes = 0u64;
        let mut index = 0u64;
        let mut nonce_buf = [0u8; 24];

        loop {
            match reader.read_exact(&mut nonce_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(S3BackupError::decryption(
                        "truncated ciphertext: final chunk missing",
                    ));
                }
                Err(e) => return Err(io_err(e)),
            }
            let nonce = XNonce::from(nonce_buf);

            let last = match reader.read_u8().await.map_err(io_err)? {
                0 => false,
                1 => true,
                other => {
                    return Err(S3BackupError::decryption(format!(
                        "chunk {index}: invalid final marker {other}"
                    )))
                }
            };

            let chunk_len = reader.read_u32().await.map_err(io_err)? as usize;
            if chunk_len > CHUNK_SIZE + TAG_SIZE {
                return Err(S3BackupError::decryption(format!(
                    "chunk {index}: length {chunk_len} exceeds maximum"
                )));
            }

            let mut ciphertext = vec![0u8; chunk_len];
            reader.read_exact(&mut ciphertext).await.map_err(io_err)?;

            let aad = chunk_aad(index, last);
            let plaintext = self
                .cipher
                .decrypt(
                    &nonce,
                    Payload {
                        msg: &ciphertext,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    S3BackupError::decryption(format!("chunk {index} failed authentication"))
                })?;

            writer.write_all(&plaintext).await.map_err(io_err)?;
            total_bytes += plaintext.len() as u64;
            index += 1;

            if last {
                let mut probe = [0u8; 1];
                if reader.read(&mut probe).await.map_err(io_err)? != 0 {
                    return Err(S3BackupError::decryption("trailing data after final chunk"));
                }
                break;
            }
        }

        writer.flush().await.map_err(io_err)?;
        Ok(total_bytes)
    }
}

/// Sync and rename the partial output into place, or discard it.
async fn commit(
    partial: &Path,
    dest: &Path,
    writer: BufWriter<fs::File>,
    outcome: Result<u64>,
) -> Result<u64> {
    let outcome = match outcome {
        Ok(n) => writer
            .into_inner()
            .sync_all()
            .await
            .map(|_| n)
            .map_err(|e| S3BackupError::local_io(partial, e)),
        Err(e) => {
            drop(writer);
            Err(e)
        }
    };

    let outcome = match outcome {
        Ok(n) => fs::rename(partial, dest)
            .await
            .map(|_| n)
            .map_err(|e| S3BackupError::local_io(dest, e)),
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        util::remove_if_exists(partial).await;
    }
    outcome
}

async fn open_pair(src: &Path, partial: &Path) -> Result<(BufReader<fs::File>, BufWriter<fs::File>)> {
    let reader = fs::File::open(src)
        .await
        .map_err(|e| S3BackupError::local_io(src, e))?;
    let writer = fs::File::create(partial)
        .await
        .map_err(|e| S3BackupError::local_io(partial, e))?;
    Ok((BufReader::new(reader), BufWriter::new(writer)))
}

#[async_trait]
impl Cipher for StreamCipher {
    async fn encrypt(&self, plain: &Path, cipher: &Path) -> Result<()> {
        debug!(src = %plain.display(), dst = %cipher.display(), "encrypting file");
        let partial = util::with_suffix(cipher, util::PARTIAL_SUFFIX);
        let (mut reader, mut writer) = open_pair(plain, &partial).await?;

        let outcome = self.encrypt_stream(&mut reader, &mut writer).await;
        let bytes = commit(&partial, cipher, writer, outcome).await?;

        info!(src = %plain.display(), dst = %cipher.display(), bytes, "file encrypted");
        Ok(())
    }

    async fn decrypt(&self, cipher: &Path, plain: &Path) -> Result<()> {
        debug!(src = %cipher.display(), dst = %plain.display(), "decrypting file");
        let partial = util::with_suffix(plain, util::PARTIAL_SUFFIX);
        let (mut reader, mut writer) = open_pair(cipher, &partial).await?;

        let outcome = self.decrypt_stream(&mut reader, &mut writer).await;
        let bytes = commit(&partial, plain, writer, outcome).await?;

        info!(src = %cipher.display(), dst = %plain.display(), bytes, "file decrypted");
        Ok(())
    }
}
