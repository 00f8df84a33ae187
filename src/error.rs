use thiserror::Error;

use crate::sources::LoadType;

/// Errors surfaced by node selection, track resolution and queue operations.
#[derive(Error, Debug)]
pub enum MusicError {
    #[error("No connected audio nodes are available")]
    NoNodesAvailable,

    #[error("Failed to resolve track ({load_type}): {message}")]
    ResolutionFailed { load_type: LoadType, message: String },

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Queue is full (max {0} tracks)")]
    QueueFull(usize),

    #[error("No audio session for this guild")]
    NotConnected,

    #[error("Queue index {0} is out of range")]
    IndexOutOfRange(usize),

    #[error("Audio transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

impl MusicError {
    /// Whether the caller should present this as "service unavailable" rather than retrying.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MusicError::NoNodesAvailable)
    }
}
