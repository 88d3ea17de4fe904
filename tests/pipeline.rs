//! Call-order tests for the client pipelines, using recording doubles for
//! the hasher, cipher and store.

use async_trait::async_trait;
use s3backup::cipher::Cipher;
use s3backup::error::{Result, S3BackupError};
use s3backup::hash::{Checksum, Hasher};
use s3backup::store::Store;
use s3backup::{Client, Stage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Calculate(PathBuf),
    Verify(PathBuf, Checksum),
    Encrypt(PathBuf, PathBuf),
    Decrypt(PathBuf, PathBuf),
    Upload(String, PathBuf, Checksum),
    Download(String, PathBuf),
}

/// Shared call log plus canned failures, keyed by operation name
#[derive(Clone, Default)]
struct Script {
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<HashMap<&'static str, fn() -> S3BackupError>>>,
}

impl Script {
    fn record(&self, op: &'static str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(op) {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    fn fail(&self, op: &'static str, make: fn() -> S3BackupError) {
        self.failures.lock().unwrap().insert(op, make);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockHasher {
    script: Script,
    checksum: &'static str,
}

#[async_trait]
impl Hasher for MockHasher {
    async fn calculate(&self, path: &Path) -> Result<Checksum> {
        self.script
            .record("calculate", Call::Calculate(path.to_path_buf()))?;
        Ok(Checksum::from(self.checksum))
    }

    async fn verify(&self, path: &Path, expected: &Checksum) -> Result<()> {
        self.script
            .record("verify", Call::Verify(path.to_path_buf(), expected.clone()))
    }
}

struct MockCipher {
    script: Script,
}

#[async_trait]
impl Cipher for MockCipher {
    async fn encrypt(&self, plain: &Path, cipher: &Path) -> Result<()> {
        self.script.record(
            "encrypt",
            Call::Encrypt(plain.to_path_buf(), cipher.to_path_buf()),
        )
    }

    async fn decrypt(&self, cipher: &Path, plain: &Path) -> Result<()> {
        self.script.record(
            "decrypt",
            Call::Decrypt(cipher.to_path_buf(), plain.to_path_buf()),
        )
    }
}

struct MockStore {
    script: Script,
    checksum: &'static str,
}

#[async_trait]
impl Store for MockStore {
    async fn upload_file(&self, remote: &str, local: &Path, checksum: &Checksum) -> Result<()> {
        self.script.record(
            "upload",
            Call::Upload(remote.to_string(), local.to_path_buf(), checksum.clone()),
        )
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<Checksum> {
        self.script.record(
            "download",
            Call::Download(remote.to_string(), local.to_path_buf()),
        )?;
        Ok(Checksum::from(self.checksum))
    }
}

fn plain_client(script: &Script) -> Client {
    Client::plain(
        MockHasher {
            script: script.clone(),
            checksum: "woahahaha",
        },
        MockStore {
            script: script.clone(),
            checksum: "muahahaha",
        },
    )
}

fn encrypted_client(script: &Script) -> Client {
    Client::encrypted(
        MockHasher {
            script: script.clone(),
            checksum: "woahahaha",
        },
        MockStore {
            script: script.clone(),
            checksum: "muahahaha",
        },
        MockCipher {
            script: script.clone(),
        },
    )
}

fn p(s: &str) -> PathBuf {
    PathBuf::from(s)
}

#[tokio::test]
async fn put_without_encryption() {
    let script = Script::default();
    let client = plain_client(&script);

    let record = client
        .put_local_file("s3://foo/bar.txt", "bar.txt")
        .await
        .expect("put should succeed");

    assert_eq!(
        script.calls(),
        vec![
            Call::Calculate(p("bar.txt")),
            Call::Upload(
                "s3://foo/bar.txt".to_string(),
                p("bar.txt"),
                Checksum::from("woahahaha")
            ),
        ]
    );
    assert_eq!(record.checksum, Checksum::from("woahahaha"));
    assert_eq!(record.remote, "s3://foo/bar.txt");
}

#[tokio::test]
async fn put_with_encryption() {
    let script = Script::default();
    let client = encrypted_client(&script);

    client
        .put_local_file("s3://foo/bar.txt", "bar.txt")
        .await
        .expect("put should succeed");

    assert_eq!(
        script.calls(),
        vec![
            Call::Encrypt(p("bar.txt"), p("bar.txt.tmp")),
            Call::Calculate(p("bar.txt.tmp")),
            Call::Upload(
                "s3://foo/bar.txt".to_string(),
                p("bar.txt.tmp"),
                Checksum::from("woahahaha")
            ),
        ]
    );
}

#[tokio::test]
async fn get_without_decryption() {
    let script = Script::default();
    let client = plain_client(&script);

    let record = client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .expect("get should succeed");

    assert_eq!(
        script.calls(),
        vec![
            Call::Download("s3://foo/bar.txt".to_string(), p("bar.txt")),
            Call::Verify(p("bar.txt"), Checksum::from("muahahaha")),
        ]
    );
    assert_eq!(record.checksum, Checksum::from("muahahaha"));
}

#[tokio::test]
async fn get_with_decryption_verifies_staged_file() {
    let script = Script::default();
    let client = encrypted_client(&script);

    client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .expect("get should succeed");

    assert_eq!(
        script.calls(),
        vec![
            Call::Download("s3://foo/bar.txt".to_string(), p("bar.txt.tmp")),
            Call::Verify(p("bar.txt.tmp"), Checksum::from("muahahaha")),
            Call::Decrypt(p("bar.txt.tmp"), p("bar.txt")),
        ]
    );
}

#[tokio::test]
async fn put_hash_failure_skips_upload() {
    let script = Script::default();
    script.fail("calculate", || {
        S3BackupError::local_io("bar.txt", std::io::ErrorKind::NotFound.into())
    });
    let client = plain_client(&script);

    let err = client
        .put_local_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Hash);
    assert!(matches!(err.source, S3BackupError::LocalIo { .. }));
    assert_eq!(script.calls(), vec![Call::Calculate(p("bar.txt"))]);
}

#[tokio::test]
async fn put_encrypt_failure_skips_hash_and_upload() {
    let script = Script::default();
    script.fail("encrypt", || S3BackupError::encryption("disk full"));
    let client = encrypted_client(&script);

    let err = client
        .put_local_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Encrypt);
    assert_eq!(
        script.calls(),
        vec![Call::Encrypt(p("bar.txt"), p("bar.txt.tmp"))]
    );
}

#[tokio::test]
async fn put_upload_failure_is_tagged() {
    let script = Script::default();
    script.fail("upload", || S3BackupError::remote("connection refused"));
    let client = encrypted_client(&script);

    let err = client
        .put_local_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Upload);
    assert!(matches!(err.source, S3BackupError::Remote(_)));
    assert_eq!(script.calls().len(), 3);
}

#[tokio::test]
async fn get_download_failure_skips_verify_and_decrypt() {
    let script = Script::default();
    script.fail("download", || S3BackupError::remote("object not found"));
    let client = encrypted_client(&script);

    let err = client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Download);
    assert_eq!(
        script.calls(),
        vec![Call::Download("s3://foo/bar.txt".to_string(), p("bar.txt.tmp"))]
    );
}

#[tokio::test]
async fn get_verify_failure_skips_decrypt() {
    let script = Script::default();
    script.fail("verify", || S3BackupError::ChecksumMismatch {
        path: PathBuf::from("bar.txt.tmp"),
        expected: "muahahaha".to_string(),
        actual: "something else".to_string(),
    });
    let client = encrypted_client(&script);

    let err = client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Verify);
    assert!(err.source.is_checksum_mismatch());
    assert_eq!(
        script.calls(),
        vec![
            Call::Download("s3://foo/bar.txt".to_string(), p("bar.txt.tmp")),
            Call::Verify(p("bar.txt.tmp"), Checksum::from("muahahaha")),
        ]
    );
}

#[tokio::test]
async fn get_plain_verify_failure_is_final() {
    let script = Script::default();
    script.fail("verify", || S3BackupError::ChecksumMismatch {
        path: PathBuf::from("bar.txt"),
        expected: "muahahaha".to_string(),
        actual: "tampered".to_string(),
    });
    let client = plain_client(&script);

    let err = client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Verify);
    assert_eq!(script.calls().len(), 2);
}

#[tokio::test]
async fn get_decrypt_failure_is_tagged() {
    let script = Script::default();
    script.fail("decrypt", || S3BackupError::decryption("chunk 0 failed authentication"));
    let client = encrypted_client(&script);

    let err = client
        .get_remote_file("s3://foo/bar.txt", "bar.txt")
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Decrypt);
    assert!(matches!(err.source, S3BackupError::Decryption(_)));
}

#[test]
fn client_mode_is_fixed_at_construction() {
    let script = Script::default();
    assert!(!plain_client(&script).is_encrypted());
    assert!(encrypted_client(&script).is_encrypted());
}
