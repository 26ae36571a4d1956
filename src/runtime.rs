//! Events broadcast from the pipeline to observers (UI, logs, tests).
//!
//! Observability is push-based: the coordinator publishes into a
//! broadcast channel and any number of subscribers consume at their own
//! pace. A lagging subscriber loses old events, never blocks the
//! pipeline.

use crate::pipeline::messages::{TurnId, TurnStage};
use tokio::sync::broadcast;

/// Default capacity of the runtime event channel.
pub const RUNTIME_EVENT_CAPACITY: usize = 256;

/// Create a runtime event channel with the default capacity.
pub fn channel() -> broadcast::Sender<RuntimeEvent> {
    broadcast::channel(RUNTIME_EVENT_CAPACITY).0
}

/// A single observable pipeline event.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A turn entered a new stage.
    Stage { turn_id: TurnId, stage: TurnStage },
    /// Transcription finished for a turn.
    Transcription {
        turn_id: TurnId,
        text: String,
        language: Option<String>,
    },
    /// Translation finished for a turn.
    Translation { turn_id: TurnId, text: String },
    /// One incremental token of assistant text.
    AssistantToken { turn_id: TurnId, text: String },
    /// The complete assistant response for a turn.
    AssistantText { turn_id: TurnId, text: String },
    /// A primary engine failed its health check and the fallback was
    /// substituted for the named stage.
    FallbackEngaged {
        turn_id: TurnId,
        stage: TurnStage,
        provider: String,
    },
    /// The turn ended in failure at the named stage.
    TurnFailed {
        turn_id: TurnId,
        stage: TurnStage,
        message: String,
    },
}
