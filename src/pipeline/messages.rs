//! Shared data model passed between pipeline stages.

use crate::error::EngineErrorKind;
use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for one conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Generate a fresh turn id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-size chunk of captured audio.
///
/// Samples are mono f32 in \[-1, 1\]; integer formats are normalized at the
/// capture boundary. Immutable once produced — chunks move between stages
/// by value.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Normalized mono samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count of the originating device (samples are already mixed down).
    pub channels: u16,
    /// Monotonic timestamp at capture time.
    pub captured_at: Instant,
}

impl AudioChunk {
    /// Duration of this chunk in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// One user utterance, mutated in place by successive pipeline stages.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Turn identifier shared by everything produced for this turn.
    pub id: TurnId,
    /// Concatenated capture audio for the whole utterance.
    pub raw_audio: Vec<f32>,
    /// Sample rate of `raw_audio` in Hz.
    pub sample_rate: u32,
    /// Transcript set by the transcription stage.
    pub transcript: Option<String>,
    /// Language detected by the transcription engine (e.g., "en").
    pub detected_language: Option<String>,
    /// Translated text set by the translation stage. Remains unset when the
    /// detected language already matches the target or translation failed.
    pub translated_text: Option<String>,
}

impl Utterance {
    /// The text a downstream stage should respond to: the translation when
    /// present, otherwise the raw transcript.
    pub fn response_text(&self) -> Option<&str> {
        self.translated_text
            .as_deref()
            .or(self.transcript.as_deref())
    }
}

/// Speaker role in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One entry in the append-only conversation history.
///
/// Never mutated or reordered after append.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// The turn this entry was produced in.
    pub turn_id: TurnId,
    pub role: Role,
    pub text: String,
    /// Wall-clock time the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// An event emitted during streamed generation.
///
/// A stream terminates exactly once, with either `Done` or `Error`.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// An incremental text fragment.
    TokenChunk(String),
    /// Generation finished; carries the full response text.
    Done(String),
    /// Generation failed.
    Error(EngineErrorKind),
}

impl GenerationEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }
}

/// Synthesized speech audio, produced once per turn and then read-shared
/// between animation and playback.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    /// Total duration in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Whether synthesis produced any samples at all.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Coarse avatar expression derived from speech energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expression {
    Neutral,
    Speaking,
    Quiet,
}

/// A facial landmark set from the landmark detector.
#[derive(Debug, Clone)]
pub struct LandmarkSet {
    /// Normalized (x, y, z) landmark coordinates.
    pub points: Vec<(f32, f32, f32)>,
    /// Mouth openness derived from lip landmarks, in \[0, 1\].
    pub mouth_open: f32,
    /// Eye-blink measure derived from eye aspect ratio, in \[0, 1\].
    pub eye_blink: f32,
}

/// One timestamped sample of avatar animation parameters.
///
/// Frames for a turn start at timestamp 0 and are delivered in strictly
/// increasing timestamp order.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    /// Zero-based index within the turn.
    pub frame_index: usize,
    /// Offset from the start of the turn's audio, in seconds.
    pub timestamp_seconds: f32,
    /// Mouth openness in \[0, 1\].
    pub mouth_open: f32,
    /// Eye-blink state in \[0, 1\] (1 = fully closed).
    pub eye_blink: f32,
    pub expression: Expression,
    /// Best-effort landmark annotation when a live video source is attached.
    pub landmarks: Option<LandmarkSet>,
}

impl AnimationFrame {
    /// A motionless frame used when synthesis produced no audio.
    pub fn neutral() -> Self {
        Self {
            frame_index: 0,
            timestamp_seconds: 0.0,
            mouth_open: 0.0,
            eye_blink: 0.0,
            expression: Expression::Neutral,
            landmarks: None,
        }
    }
}

/// Per-turn pipeline state machine.
///
/// `Cancelled` and `Failed` are terminal and reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Idle,
    Capturing,
    Transcribing,
    Translating,
    Generating,
    Synthesizing,
    Animating,
    Complete,
    Cancelled,
    Failed,
}

impl TurnStage {
    /// Whether the turn can make no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for TurnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Translating => "translating",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Animating => "animating",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_prefers_translation() {
        let mut u = Utterance {
            id: TurnId::new(),
            raw_audio: vec![0.0; 16_000],
            sample_rate: 16_000,
            transcript: Some("hello".into()),
            detected_language: Some("en".into()),
            translated_text: None,
        };
        assert_eq!(u.response_text(), Some("hello"));
        u.translated_text = Some("hola".into());
        assert_eq!(u.response_text(), Some("hola"));
    }

    #[test]
    fn terminal_stages() {
        assert!(TurnStage::Complete.is_terminal());
        assert!(TurnStage::Cancelled.is_terminal());
        assert!(TurnStage::Failed.is_terminal());
        assert!(!TurnStage::Generating.is_terminal());
    }

    #[test]
    fn generation_event_terminality() {
        assert!(!GenerationEvent::TokenChunk("hi".into()).is_terminal());
        assert!(GenerationEvent::Done("hi".into()).is_terminal());
        assert!(GenerationEvent::Error(EngineErrorKind::Timeout).is_terminal());
    }

    #[test]
    fn synthesized_audio_duration() {
        let audio = SynthesizedAudio {
            samples: vec![0.0; 16_000],
            sample_rate: 16_000,
        };
        assert!((audio.duration_seconds() - 1.0).abs() < f32::EPSILON);
    }
}
