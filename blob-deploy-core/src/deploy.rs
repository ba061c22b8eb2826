//! High-level pipeline: prepare the container, then upload every file.
//!
//! This module provides the top-level orchestration for one deployment. It:
//!   - validates the options before any remote call
//!   - starts the preparation stage (create container, clear prefix) right away
//!   - processes the files in input order with at most `concurrency` in flight
//!   - gzips each file when configured and the compressed payload is not larger
//!   - reports the first error seen anywhere, after every started task finished
//!
//! # Major Types
//! - [`DeployPhase`]: the per-invocation state machine, logged on each transition
//!
//! # Responsibilities
//! - Every upload waits for the shared [`PreparationSignal`]
//! - Temp `.zip` files never outlive the upload of their file
//! - In test runs, delete/upload are never called but the same events are emitted
//!
//! # Error Handling
//! The first failure (preparation or any file) is returned. Sibling uploads
//! that already started are not cancelled; their outcomes are discarded.
//!
//! # Navigation
//! - Main entrypoint: [`deploy`]
//! - Per-file step: [`upload_file`]

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::compress::{compress_and_choose, CompressedChoice};
use crate::config::{DeployOptions, FileDescriptor, UploadTask};
use crate::contract::BlobTransport;
use crate::error::{DeployError, DeployResult};
use crate::events::{DeployEvent, EventSink};
use crate::prepare::{prepare_into, PreparationSignal};

/// Lifecycle of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Idle,
    Preparing,
    Uploading,
    Done,
    Failed,
}

fn enter(phase: DeployPhase, container: &str) {
    info!(container, phase = ?phase, "[DEPLOY] phase");
}

/// Deploys `files` into the configured container.
pub async fn deploy<T, S>(
    transport: &T,
    options: &DeployOptions,
    files: &[FileDescriptor],
    sink: &S,
) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    if options.container_name.is_empty() {
        error!("[DEPLOY][ERROR] no container name configured");
        return Err(DeployError::MissingContainerName);
    }
    let container = options.container_name.as_str();
    enter(DeployPhase::Idle, container);
    options.trace_loaded();

    let signal = PreparationSignal::new();
    enter(DeployPhase::Preparing, container);
    let preparation = prepare_into(transport, options, sink, &signal);

    if files.is_empty() {
        info!(container, "[DEPLOY] no files to upload, preparation only");
        let outcome = preparation.await;
        finish(container, &outcome);
        return outcome;
    }

    let concurrency = options.effective_concurrency();
    let uploads = async {
        let mut first_error: Option<DeployError> = None;
        let mut results = stream::iter(files.iter().enumerate())
            .map(|(index, file)| upload_file(transport, options, file, sink, &signal, index))
            .buffer_unordered(concurrency);

        while let Some(result) = results.next().await {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    debug!(container, error = ?e, "[DEPLOY] later failure ignored");
                }
            }
        }
        first_error
    };

    let (prepared, upload_error) = tokio::join!(
        async {
            let outcome = preparation.await;
            if outcome.is_ok() {
                enter(DeployPhase::Uploading, container);
            }
            outcome
        },
        uploads
    );

    let outcome = match (prepared, upload_error) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(e)) => Err(e),
        (Ok(()), None) => Ok(()),
    };
    finish(container, &outcome);
    outcome
}

fn finish(container: &str, outcome: &DeployResult<()>) {
    match outcome {
        Ok(()) => enter(DeployPhase::Done, container),
        Err(e) => {
            error!(container, error = %e, "[DEPLOY][ERROR] deployment failed");
            enter(DeployPhase::Failed, container);
        }
    }
}

/// Uploads one file once preparation has succeeded.
pub async fn upload_file<T, S>(
    transport: &T,
    options: &DeployOptions,
    file: &FileDescriptor,
    sink: &S,
    signal: &PreparationSignal,
    index: usize,
) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    if file.uses_legacy_cwd() {
        warn!(file = %file.path.display(), "[DEPLOY] `cwd` used without `base`");
        sink.emit(DeployEvent::CwdDeprecated);
    }

    let task = UploadTask::derive(options, file);
    debug!(index, source = %task.source.display(), key = %task.dest_key, "[UPLOAD] task derived");

    signal.wait().await?;

    if !options.compress {
        return send(transport, options, sink, &task).await;
    }

    let CompressedChoice {
        payload,
        metadata,
        temp_file,
    } = compress_and_choose(&task.source, &task.metadata).await?;
    let compressed_task = UploadTask {
        dest_key: task.dest_key,
        metadata,
        source: payload,
    };
    // `temp_file` unlinks on drop if this future is cancelled mid-upload.
    let outcome = send(transport, options, sink, &compressed_task).await;
    temp_file.remove().await;
    outcome
}

async fn send<T, S>(
    transport: &T,
    options: &DeployOptions,
    sink: &S,
    task: &UploadTask,
) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    let container = options.container_name.as_str();
    let dest_key = task.dest_key.as_str();
    sink.emit(DeployEvent::Uploading {
        key: dest_key.to_string(),
        encoding: task.metadata.content_encoding.clone(),
    });

    if options.test_run {
        debug!(container, key = dest_key, "[UPLOAD] test run, upload skipped");
    } else if let Err(e) = transport
        .upload_local_file(container, dest_key, &task.source, &task.metadata)
        .await
    {
        error!(container, key = dest_key, error = ?e, "[UPLOAD][ERROR] upload failed");
        return Err(DeployError::Upload {
            key: dest_key.to_string(),
            source: e,
        });
    }

    sink.emit(DeployEvent::Uploaded {
        key: dest_key.to_string(),
        container: container.to_string(),
    });
    info!(container, key = dest_key, payload = %task.source.display(), "[UPLOAD] uploaded");
    Ok(())
}
