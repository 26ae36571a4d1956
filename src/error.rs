//! Error types for the voxbridge pipeline.

use crate::pipeline::messages::TurnStage;

/// Classification of failures reported by external engine ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The engine could not be reached (connection refused, not running).
    Unavailable,
    /// The engine did not respond within the configured deadline.
    Timeout,
    /// The engine responded, but the response was malformed or unusable.
    InvalidResponse,
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Top-level error type for the conversation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Empty or invalid user input (e.g., no audio chunks submitted).
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// An external engine call failed, tagged with the pipeline stage.
    #[error("{stage} engine failure ({kind}): {message}")]
    Engine {
        /// Pipeline stage whose engine call failed.
        stage: TurnStage,
        /// Failure classification (drives the retry/fallback policy one layer up).
        kind: EngineErrorKind,
        /// Human-readable detail from the engine adapter.
        message: String,
    },

    /// A turn was submitted while another is still active.
    #[error("a turn is already active for this conversation")]
    TurnActive,

    /// The turn was cancelled cooperatively.
    #[error("turn cancelled")]
    Cancelled,

    /// Synthesis produced no samples. Non-fatal: degrades to a neutral frame.
    #[error("synthesized audio is empty")]
    EmptyAudio,

    /// Landmark detection found no face in the frame. Non-fatal.
    #[error("no face detected")]
    NoFaceDetected,

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build a stage-tagged engine error.
    pub fn engine(stage: TurnStage, kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self::Engine {
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Returns the engine error classification, if this is an engine error.
    pub fn engine_kind(&self) -> Option<EngineErrorKind> {
        match self {
            Self::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the stage an engine error was tagged with, if any.
    pub fn failed_stage(&self) -> Option<TurnStage> {
        match self {
            Self::Engine { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BridgeError>;
