use async_trait::async_trait;
use blob_deploy_core::compress::{compress_and_choose, temp_path_for, GZIP_ENCODING};
use blob_deploy_core::config::{BlobMetadata, ContainerOptions, DeployOptions, FileDescriptor};
use blob_deploy_core::contract::{BlobEntry, BlobError, BlobTransport, MockBlobTransport};
use blob_deploy_core::deploy::deploy;
use blob_deploy_core::error::DeployError;
use blob_deploy_core::events::{DeployEvent, RecordingSink};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Highly repetitive text: gzip always wins.
fn write_compressible(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "console.log('hello world');\n".repeat(500)).unwrap();
    path
}

/// A couple of bytes: the gzip header alone makes the compressed file bigger.
fn write_tiny(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"x").unwrap();
    path
}

#[tokio::test]
async fn test_compressed_payload_chosen_when_smaller() {
    let dir = tempdir().unwrap();
    let source = write_compressible(dir.path(), "app.js");

    let choice = compress_and_choose(&source, &BlobMetadata::default())
        .await
        .expect("compression should succeed");

    assert!(choice.is_compressed());
    assert_eq!(choice.payload, temp_path_for(&source));
    assert_eq!(choice.metadata.content_encoding.as_deref(), Some(GZIP_ENCODING));
    assert!(choice.temp_file.path().exists(), "the temp file lives as long as the choice");
    assert!(fs::metadata(choice.temp_file.path()).unwrap().len() < fs::metadata(&source).unwrap().len());
}

#[tokio::test]
async fn test_original_chosen_when_gzip_is_bigger() {
    let dir = tempdir().unwrap();
    let source = write_tiny(dir.path(), "a.txt");
    let metadata = BlobMetadata::default();

    let choice = compress_and_choose(&source, &metadata)
        .await
        .expect("compression should succeed");

    assert!(!choice.is_compressed());
    assert_eq!(choice.payload, source);
    assert_eq!(choice.metadata, metadata);
    assert!(choice.temp_file.path().exists(), "the temp file lives as long as the choice");
}

#[tokio::test]
async fn test_missing_source_fails_compression() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("missing.js");

    let err = compress_and_choose(&source, &BlobMetadata::default())
        .await
        .expect_err("missing source must fail");
    assert!(matches!(err, DeployError::Compression { .. }));
    assert!(!temp_path_for(&source).exists());
}

fn capture_uploads(transport: &mut MockBlobTransport) -> Arc<Mutex<Vec<(PathBuf, BlobMetadata, bool)>>> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    transport.expect_upload_local_file().returning(
        move |_: &str, _: &str, path: &Path, metadata: &BlobMetadata| {
            seen.lock()
                .unwrap()
                .push((path.to_path_buf(), metadata.clone(), path.exists()));
            Ok(())
        },
    );
    calls
}

#[tokio::test]
async fn test_deploy_uploads_gzip_and_removes_temp_file() {
    let dir = tempdir().unwrap();
    let source = write_compressible(dir.path(), "app.js");

    let mut transport = MockBlobTransport::new();
    transport
        .expect_create_container_if_not_exists()
        .returning(|_, _| Ok(()));
    let calls = capture_uploads(&mut transport);
    let sink = RecordingSink::new();

    let options = DeployOptions::new("web")
        .with_destination_prefix("pre")
        .with_delete_existing(false)
        .with_compress(true);
    let files = vec![FileDescriptor::new(&source).with_base(dir.path())];

    deploy(&transport, &options, &files, &sink)
        .await
        .expect("deploy should succeed");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (path, metadata, existed) = &calls[0];
    assert_eq!(path, &temp_path_for(&source));
    assert!(*existed, "temp file must exist while uploading");
    assert_eq!(metadata.content_encoding.as_deref(), Some("gzip"));
    assert!(metadata.content_type.is_some());
    assert!(!temp_path_for(&source).exists(), "temp file must be removed after upload");
    assert!(sink.events().contains(&DeployEvent::Uploading {
        key: "pre/app.js".into(),
        encoding: Some("gzip".into()),
    }));
}

#[tokio::test]
async fn test_deploy_uploads_original_and_still_removes_temp_file() {
    let dir = tempdir().unwrap();
    let source = write_tiny(dir.path(), "tiny.js");

    let mut transport = MockBlobTransport::new();
    transport
        .expect_create_container_if_not_exists()
        .returning(|_, _| Ok(()));
    let calls = capture_uploads(&mut transport);
    let sink = RecordingSink::new();

    let options = DeployOptions::new("web")
        .with_delete_existing(false)
        .with_compress(true);
    let files = vec![FileDescriptor::new(&source).with_base(dir.path())];

    deploy(&transport, &options, &files, &sink)
        .await
        .expect("deploy should succeed");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, source);
    assert_eq!(calls[0].1.content_encoding, None);
    assert!(!temp_path_for(&source).exists());
    assert!(sink.events().contains(&DeployEvent::Uploading {
        key: "tiny.js".into(),
        encoding: None,
    }));
}

#[tokio::test]
async fn test_temp_file_removed_when_upload_fails() {
    let dir = tempdir().unwrap();
    let source = write_compressible(dir.path(), "app.js");

    let mut transport = MockBlobTransport::new();
    transport
        .expect_create_container_if_not_exists()
        .returning(|_, _| Ok(()));
    transport
        .expect_upload_local_file()
        .times(1)
        .returning(|_, _, _, _| Err(BlobError::new("network down")));
    let sink = RecordingSink::new();

    let options = DeployOptions::new("web")
        .with_delete_existing(false)
        .with_compress(true);
    let files = vec![FileDescriptor::new(&source).with_base(dir.path())];

    let err = deploy(&transport, &options, &files, &sink)
        .await
        .expect_err("upload failure must be reported");

    assert!(matches!(err, DeployError::Upload { .. }));
    assert!(!temp_path_for(&source).exists());
    assert!(sink
        .events()
        .iter()
        .all(|e| !matches!(e, DeployEvent::Uploaded { .. })));
}

#[tokio::test]
async fn test_dropping_the_choice_removes_temp_file() {
    let dir = tempdir().unwrap();
    let source = write_compressible(dir.path(), "app.js");

    let choice = compress_and_choose(&source, &BlobMetadata::default())
        .await
        .expect("compression should succeed");
    assert!(temp_path_for(&source).exists());

    drop(choice);
    assert!(!temp_path_for(&source).exists());
    assert!(source.exists(), "the original is never touched");
}

/// Uploads never finish; records whether the payload existed when the upload began.
struct StalledTransport {
    payload_seen: Mutex<Option<(PathBuf, bool)>>,
}

#[async_trait]
impl BlobTransport for StalledTransport {
    async fn create_container_if_not_exists(
        &self,
        _container: &str,
        _options: &ContainerOptions,
    ) -> Result<(), BlobError> {
        Ok(())
    }

    async fn list_all_with_prefix(
        &self,
        _container: &str,
        _prefix: &str,
    ) -> Result<Vec<BlobEntry>, BlobError> {
        Ok(vec![])
    }

    async fn delete_blob(&self, _container: &str, _name: &str) -> Result<(), BlobError> {
        Ok(())
    }

    async fn upload_local_file(
        &self,
        _container: &str,
        _dest_key: &str,
        local_path: &Path,
        _metadata: &BlobMetadata,
    ) -> Result<(), BlobError> {
        *self.payload_seen.lock().unwrap() = Some((local_path.to_path_buf(), local_path.exists()));
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_deploy_removes_temp_file() {
    let dir = tempdir().unwrap();
    let source = write_compressible(dir.path(), "app.js");
    let transport = StalledTransport {
        payload_seen: Mutex::new(None),
    };
    let sink = RecordingSink::new();

    let options = DeployOptions::new("web")
        .with_delete_existing(false)
        .with_compress(true);
    let files = vec![FileDescriptor::new(&source).with_base(dir.path())];

    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        deploy(&transport, &options, &files, &sink),
    )
    .await;

    assert!(outcome.is_err(), "the stalled upload must hit the timeout");
    let seen = transport.payload_seen.lock().unwrap().clone();
    assert_eq!(seen, Some((temp_path_for(&source), true)));
    assert!(!temp_path_for(&source).exists(), "temp file must not outlive a cancelled deploy");
}
