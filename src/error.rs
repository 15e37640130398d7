use crate::capture::Capability;
use crate::upload::PipelineState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{capability} permission has not been granted")]
    PermissionDenied { capability: Capability },

    #[error("Capture error: {details}")]
    Capture { details: String },

    #[error("Invalid media at {}: {reason}", .path.display())]
    InvalidMedia { path: PathBuf, reason: String },

    #[error("Missing input: {what}")]
    MissingInput { what: String },

    #[error("An upload is already in progress")]
    AlreadyInProgress,

    #[error("An upload session is already active; reset it first")]
    SessionActive,

    #[error("Cannot {operation} while pipeline is {state}")]
    InvalidState {
        state: PipelineState,
        operation: &'static str,
    },

    #[error("Upload failed{}: {detail}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    UploadFailed { status: Option<u16>, detail: String },

    #[error("Malformed response: {details}")]
    MalformedResponse { details: String },

    #[error("Transport error: {details}")]
    Transport { details: String },

    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session was reset while the operation was running")]
    SessionReset,
}

impl PipelineError {
    pub fn capture<S: Into<String>>(details: S) -> Self {
        Self::Capture {
            details: details.into(),
        }
    }

    pub fn invalid_media<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidMedia {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_input<S: Into<String>>(what: S) -> Self {
        Self::MissingInput { what: what.into() }
    }

    pub fn storage<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn transport<S: Into<String>>(details: S) -> Self {
        Self::Transport {
            details: details.into(),
        }
    }

    /// Errors the user can remediate directly (grant access, capture again).
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::Capture { .. }
                | Self::MissingInput { .. }
                | Self::InvalidMedia { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
