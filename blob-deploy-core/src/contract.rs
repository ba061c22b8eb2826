//! # contract: the blob storage seam
//!
//! This module defines the single trait ([`BlobTransport`]) the deploy pipeline
//! talks to. A transport wraps the four remote operations the pipeline needs:
//! create a container, list blobs under a prefix, delete a blob and upload a
//! local file.
//!
//! ## Interface & Extensibility
//! - Implement [`BlobTransport`] for a new storage backend (Azure, an emulator, a test fake).
//! - All methods are async and report failures as [`BlobError`], which keeps the
//!   backend error code so the pipeline can recognise distinguished cases.
//! - Implementations may use their own worker pools; the pipeline only relies
//!   on each call completing once.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`, so consumers get `MockBlobTransport`
//!   for deterministic unit and integration tests.

use async_trait::async_trait;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

pub use crate::config::{BlobMetadata, ContainerOptions};
pub use crate::error::BlobError;

/// One listed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
}

impl BlobEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Remote blob storage operations used by the deploy pipeline.
///
/// The trait is `Send` + `Sync` and intended for async/await usage.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Create the container unless it already exists. "Already exists" is success.
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> Result<(), BlobError>;

    /// List every blob whose name starts with `prefix`.
    ///
    /// Implementors follow continuation markers until the listing is exhausted.
    async fn list_all_with_prefix(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobEntry>, BlobError>;

    /// Delete a single blob.
    async fn delete_blob(&self, container: &str, name: &str) -> Result<(), BlobError>;

    /// Upload a local file as one blob, with the given content settings.
    async fn upload_local_file(
        &self,
        container: &str,
        dest_key: &str,
        local_path: &Path,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobError>;
}
