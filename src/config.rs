//! Configuration types for the conversation pipeline.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the voxbridge pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Translation settings.
    pub translation: TranslationConfig,
    /// Response generation settings.
    pub generation: GenerationConfig,
    /// Speech synthesis settings.
    pub synthesis: SynthesisConfig,
    /// Conversation history settings.
    pub conversation: ConversationConfig,
    /// Avatar animation settings.
    pub animation: AnimationConfig,
    /// Per-stage timeouts and cancellation grace.
    pub timeouts: TimeoutConfig,
    /// Fallback-provider substitution policy.
    pub fallback: FallbackConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing sections fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| BridgeError::Config(format!("parse {path:?}: {e}")))
    }
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input sample rate in Hz.
    pub input_sample_rate: u32,
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
    /// Number of input channels (1 = mono).
    pub input_channels: u16,
    /// Fixed chunk size in samples emitted by audio sources.
    pub chunk_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_channels: 1,
            chunk_size: 512,
            input_device: None,
            output_device: None,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Optional language hint passed to the transcription engine
    /// (None = autodetect).
    pub language_hint: Option<String>,
}

/// Translation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Target language for assistant responses (ISO 639-1 code).
    pub target_language: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_owned(),
        }
    }
}

/// Response generation (language model) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Voice profile name passed to the synthesis engine.
    pub voice: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: "default".to_owned(),
        }
    }
}

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// System prompt folded into every generation request.
    pub system_prompt: String,
    /// Maximum prompt context size in characters. Oldest turns are dropped
    /// first; a turn's text is never split.
    pub max_context_chars: usize,
    /// Maximum retained history entries; oldest are trimmed beyond this.
    pub max_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful voice assistant. Reply in one or two short \
                            sentences suitable for speech synthesis."
                .to_owned(),
            max_context_chars: 4096,
            max_turns: 100,
        }
    }
}

/// Avatar animation configuration.
///
/// The blink and smoothing values are tuning defaults, not contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Frame rate of the animation stream.
    pub fps: u32,
    /// Gain applied to normalized frame energy before clamping to \[0, 1\].
    pub mouth_gain: f32,
    /// Smoothing factor when mouth openness is increasing, in (0, 1\].
    pub mouth_attack: f32,
    /// Smoothing factor when mouth openness is decreasing, in (0, 1\].
    ///
    /// Kept below `mouth_attack` so the mouth closes slightly slower than it
    /// opens, mimicking natural closing lag.
    pub mouth_release: f32,
    /// Minimum seconds between blinks.
    pub blink_min_interval_s: f32,
    /// Maximum seconds between blinks.
    pub blink_max_interval_s: f32,
    /// Duration of the eyelid-closing phase in milliseconds.
    pub blink_closing_ms: u32,
    /// Duration eyes stay fully closed in milliseconds.
    pub blink_closed_ms: u32,
    /// Duration of the eyelid-opening phase in milliseconds.
    pub blink_opening_ms: u32,
    /// Seed for the deterministic blink scheduler.
    pub blink_seed: u64,
    /// Bounded look-ahead: maximum frames buffered ahead of the renderer.
    pub lookahead_frames: usize,
    /// When true, frame production is paced to wall-clock frame timestamps.
    /// Disable for offline processing and tests.
    pub realtime: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            mouth_gain: 2.0,
            mouth_attack: 0.55,
            mouth_release: 0.35,
            blink_min_interval_s: 3.0,
            blink_max_interval_s: 5.0,
            blink_closing_ms: 60,
            blink_closed_ms: 90,
            blink_opening_ms: 100,
            blink_seed: 0,
            lookahead_frames: 3,
            realtime: true,
        }
    }
}

/// Per-stage timeouts in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Transcription stage deadline.
    pub transcription_ms: u64,
    /// Translation stage deadline.
    pub translation_ms: u64,
    /// Whole-response generation deadline.
    pub generation_ms: u64,
    /// Synthesis stage deadline.
    pub synthesis_ms: u64,
    /// Grace period after a cancellation request before the turn is forced
    /// into `Cancelled` without waiting for engine acknowledgment.
    pub cancel_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transcription_ms: 10_000,
            translation_ms: 5_000,
            generation_ms: 30_000,
            synthesis_ms: 20_000,
            cancel_grace_ms: 500,
        }
    }
}

/// Fallback-provider substitution policy.
///
/// When enabled and a backend fails its health check at turn start, the
/// configured fallback provider is substituted for that stage only. The
/// substitution is always flagged in the turn result, never silent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Whether fallback substitution is allowed at all.
    pub enabled: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
