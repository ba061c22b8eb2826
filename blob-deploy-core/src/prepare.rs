//! Container preparation: create the container, then clear the destination prefix.
//!
//! [`prepare`] runs strictly in order: create, list, delete. Deletions run
//! concurrently; the first failure decides the outcome, the remaining ones are
//! still driven to completion and their results dropped.
//!
//! [`PreparationSignal`] carries the outcome to every upload task. It is
//! resolved once and can be awaited any number of times.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::DeployOptions;
use crate::contract::BlobTransport;
use crate::error::{DeployError, DeployResult, CONTAINER_BEING_DELETED};
use crate::events::{DeployEvent, EventSink};

#[derive(Debug, Clone)]
enum PreparationState {
    Pending,
    Ready,
    Failed(DeployError),
}

/// Resolve-once, await-many outcome of the preparation stage.
#[derive(Debug)]
pub struct PreparationSignal {
    state: watch::Sender<PreparationState>,
}

impl Default for PreparationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PreparationSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PreparationState::Pending);
        Self { state }
    }

    /// Records the outcome. Only the first call has any effect.
    pub fn resolve(&self, outcome: DeployResult<()>) -> bool {
        self.state.send_if_modified(|state| {
            if !matches!(state, PreparationState::Pending) {
                return false;
            }
            *state = match outcome {
                Ok(()) => PreparationState::Ready,
                Err(e) => PreparationState::Failed(e),
            };
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.state.borrow(), PreparationState::Pending)
    }

    /// Waits until the outcome is known and returns a copy of it.
    pub async fn wait(&self) -> DeployResult<()> {
        let mut waiter = self.state.subscribe();
        let state = waiter
            .wait_for(|state| !matches!(state, PreparationState::Pending))
            .await;
        match state {
            Ok(state) => match &*state {
                PreparationState::Failed(e) => Err(e.clone()),
                _ => Ok(()),
            },
            // The sender lives in `self`, so the channel cannot close while we borrow it.
            Err(_) => Ok(()),
        }
    }
}

/// Runs `prepare` and publishes its outcome on `signal`.
pub async fn prepare_into<T, S>(
    transport: &T,
    options: &DeployOptions,
    sink: &S,
    signal: &PreparationSignal,
) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    let outcome = prepare(transport, options, sink).await;
    signal.resolve(outcome.clone());
    outcome
}

/// Ensures the container exists and, when configured, removes every blob under the prefix.
pub async fn prepare<T, S>(transport: &T, options: &DeployOptions, sink: &S) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    ensure_container(transport, options).await?;

    if !options.delete_existing {
        info!(container = %options.container_name, "[PREPARE] keeping existing blobs");
        return Ok(());
    }

    clear_prefix(transport, options, sink).await
}

async fn ensure_container<T>(transport: &T, options: &DeployOptions) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
{
    let container = &options.container_name;
    info!(container = %container, "[PREPARE] ensuring container exists");

    match transport
        .create_container_if_not_exists(container, &options.container_options)
        .await
    {
        Ok(()) => {
            info!(container = %container, "[PREPARE] container ready");
            Ok(())
        }
        Err(e) if e.is(CONTAINER_BEING_DELETED) => {
            error!(container = %container, error = ?e, "[PREPARE][ERROR] container is being deleted");
            Err(DeployError::ContainerBeingDeleted {
                container: container.clone(),
            })
        }
        Err(e) => {
            error!(container = %container, error = ?e, "[PREPARE][ERROR] failed to create container");
            Err(DeployError::Container(e))
        }
    }
}

/// Removes all blobs under the destination prefix.
pub async fn clear_prefix<T, S>(transport: &T, options: &DeployOptions, sink: &S) -> DeployResult<()>
where
    T: BlobTransport + ?Sized,
    S: EventSink + ?Sized,
{
    let container = options.container_name.as_str();
    let prefix = options.destination_prefix.as_str();

    let blobs = match transport.list_all_with_prefix(container, prefix).await {
        Ok(blobs) => blobs,
        Err(e) => {
            error!(container, prefix, error = ?e, "[PREPARE][ERROR] failed to list blobs");
            return Err(DeployError::List(e));
        }
    };

    if blobs.is_empty() {
        info!(container, prefix, "[PREPARE] nothing to delete");
        return Ok(());
    }
    info!(container, prefix, count = blobs.len(), "[PREPARE] deleting existing blobs");

    let remaining = AtomicUsize::new(blobs.len());
    let mut deletions: FuturesUnordered<_> = blobs
        .into_iter()
        .map(|blob| {
            let remaining = &remaining;
            async move {
                sink.emit(DeployEvent::Deleting {
                    name: blob.name.clone(),
                });
                if !options.test_run {
                    if let Err(e) = transport.delete_blob(container, &blob.name).await {
                        sink.emit(DeployEvent::DeleteFailed {
                            name: blob.name.clone(),
                        });
                        return Err(DeployError::Delete {
                            name: blob.name,
                            source: e,
                        });
                    }
                }
                sink.emit(DeployEvent::Deleted {
                    name: blob.name.clone(),
                });
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    debug!(container, "[PREPARE] last deletion finished");
                }
                Ok(())
            }
        })
        .collect();

    let mut first_error: Option<DeployError> = None;
    while let Some(result) = deletions.next().await {
        if let Err(e) = result {
            if first_error.is_none() {
                error!(container, error = ?e, "[PREPARE][ERROR] deletion failed");
                first_error = Some(e);
            } else {
                debug!(container, error = ?e, "[PREPARE] further deletion failure ignored");
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(container, prefix, "[PREPARE] prefix cleared");
            Ok(())
        }
    }
}
