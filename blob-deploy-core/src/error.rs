//! Error types shared by the deploy pipeline and its transports.
//!
//! [`BlobError`] is what a [`crate::contract::BlobTransport`] reports: an optional
//! backend error code plus a message. [`DeployError`] is what [`crate::deploy::deploy`]
//! resolves with; it is `Clone` so one preparation failure can be handed to every
//! file task waiting on it.

use std::path::PathBuf;
use std::sync::Arc;

/// Backend error code reported while a container with the same name is still being removed.
pub const CONTAINER_BEING_DELETED: &str = "ContainerBeingDeleted";

/// Error reported by a blob storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_blob_error(.code, .message))]
pub struct BlobError {
    /// Backend defined error code (for Azure, the `x-ms-error-code` header).
    pub code: Option<String>,
    pub message: String,
}

fn render_blob_error(code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    }
}

impl BlobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// True when the backend code matches `code`.
    pub fn is(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Everything that can make a deployment fail.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeployError {
    #[error("Missing containerName!")]
    MissingContainerName,

    #[error("Container being deleted, retry in 10 seconds (container={container})")]
    ContainerBeingDeleted { container: String },

    #[error("failed to create container: {0}")]
    Container(#[source] BlobError),

    #[error("failed to list existing blobs: {0}")]
    List(#[source] BlobError),

    #[error("failed to delete blob {name}: {source}")]
    Delete {
        name: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to gzip {}: {source}", .path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: BlobError,
    },
}

impl DeployError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn compression(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Compression {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Whether trying again later may succeed without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::ContainerBeingDeleted { .. })
    }
}

pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_name_keeps_its_literal_message() {
        assert_eq!(
            DeployError::MissingContainerName.to_string(),
            "Missing containerName!"
        );
    }

    #[test]
    fn blob_error_renders_code_when_present() {
        let err = BlobError::with_code("AuthenticationFailed", "signature mismatch");
        assert_eq!(err.to_string(), "AuthenticationFailed: signature mismatch");
        assert!(err.is("AuthenticationFailed"));
        assert_eq!(BlobError::new("boom").to_string(), "boom");
    }

    #[test]
    fn only_container_being_deleted_is_retryable() {
        let busy = DeployError::ContainerBeingDeleted {
            container: "web".into(),
        };
        assert!(busy.is_retryable());
        assert!(busy.to_string().contains("retry in 10 seconds"));
        assert!(!DeployError::Container(BlobError::new("nope")).is_retryable());
    }
}
