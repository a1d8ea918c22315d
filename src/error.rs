//! Error types for the learning core.
//!
//! Invalid actions and too-short histories are not errors: the environment
//! answers them with a penalty reward and the reward model with its base
//! case. Everything here is either a construction/loading failure (fatal to
//! a run) or an approximator failure (fatal to one episode).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the playlist core
#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Song catalog is empty")]
    EmptyCatalog,

    #[error("Duplicate song id in catalog: {0}")]
    DuplicateSongId(String),

    #[error("Song '{song_id}' is missing required attribute '{field}'")]
    MissingField { song_id: String, field: &'static str },

    #[error("Embedding dimension mismatch: expected {expected}, found {found} (song '{song_id}')")]
    EmbeddingDimension {
        song_id: String,
        expected: usize,
        found: usize,
    },

    #[error("Approximator shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("Approximator produced non-finite values ({0})")]
    NonFiniteOutput(&'static str),

    #[error("No available actions to choose from")]
    NoAvailableActions,

    #[error("Unknown song id: {0}")]
    UnknownSong(String),

    #[error("No trained or loaded model is available")]
    ModelNotLoaded,

    #[error("Failed to persist model parameters at {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlaylistError {
    /// True for failures raised by the function approximator.
    ///
    /// The trainer contains these to the episode in which they occur.
    pub fn is_approximator_failure(&self) -> bool {
        matches!(
            self,
            PlaylistError::ShapeMismatch { .. } | PlaylistError::NonFiniteOutput(_)
        )
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, PlaylistError>;
