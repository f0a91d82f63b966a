//! Model management error types

use std::io;

use thiserror::Error;
use voxkit_core::TransportError;

/// Broad cause of a [`ModelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network unreachable or unexpected HTTP status
    Network,
    /// Local file write, move or delete failed
    Storage,
    /// Manifest or metadata could not be parsed
    Parse,
    /// Registry misuse (not initialized, unknown family, no strategy)
    Precondition,
    /// Transfer was cancelled by the caller
    Cancelled,
}

/// Model management errors
#[derive(Error, Debug)]
pub enum ModelError {
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// File system operation failed
    #[error("Storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    /// I/O error without further context
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Manifest parse error
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transfer cancelled
    #[error("Download cancelled")]
    Cancelled,

    /// Registry used before initialize()
    #[error("Model registry not initialized. Call initialize() first.")]
    NotInitialized,

    /// No strategy supports the model type
    #[error("No download strategy registered for model type: {0}")]
    NoStrategy(String),

    /// No catalog registered for the family
    #[error("Unknown model family: {0}")]
    UnknownFamily(String),

    /// Descriptor cannot be downloaded as described
    #[error("Invalid model descriptor: {0}")]
    InvalidDescriptor(String),

    /// Model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A download this call was waiting on failed
    #[error("Download failed: {message}")]
    DownloadFailed { kind: ErrorKind, message: String },
}

impl ModelError {
    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        ModelError::Storage {
            context: context.into(),
            source,
        }
    }

    /// Classify the error so callers can tell network, storage and misuse apart
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::Transport(_) | ModelError::HttpStatus { .. } => ErrorKind::Network,
            ModelError::Storage { .. } | ModelError::Io(_) => ErrorKind::Storage,
            ModelError::Parse(_) | ModelError::Serialization(_) => ErrorKind::Parse,
            ModelError::Cancelled => ErrorKind::Cancelled,
            ModelError::NotInitialized
            | ModelError::NoStrategy(_)
            | ModelError::UnknownFamily(_)
            | ModelError::InvalidDescriptor(_)
            | ModelError::ModelNotFound(_) => ErrorKind::Precondition,
            ModelError::DownloadFailed { kind, .. } => *kind,
        }
    }

    /// Cancellation is a terminal state, not a failure
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
