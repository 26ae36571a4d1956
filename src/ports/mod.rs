//! Abstract interfaces to the external model engines.
//!
//! Each engine (speech-to-text, translation, generation, synthesis, facial
//! landmarks) sits behind a narrow `async_trait` Port. The pipeline never
//! inspects engine types at runtime — fallback substitution binds a
//! different Port implementation explicitly at turn start.

pub mod demo;

use crate::error::Result;
use crate::pipeline::messages::{GenerationEvent, LandmarkSet, SynthesizedAudio};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-segment timing information from the transcription engine.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_seconds: f32,
    pub end_seconds: f32,
}

/// Result of a transcription call.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    /// Full transcript text.
    pub text: String,
    /// Detected language (ISO 639-1), when the engine reports one.
    pub detected_language: Option<String>,
    /// Optional per-segment timing.
    pub segments: Vec<TranscriptSegment>,
}

/// Sampling options forwarded to the generation engine.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        let config = crate::config::GenerationConfig::default();
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

impl From<&crate::config::GenerationConfig> for GenerationOptions {
    fn from(config: &crate::config::GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

/// A single video frame handed to the landmark detector.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB pixel data, row-major.
    pub data: Vec<u8>,
}

/// Interface to an external speech-to-text engine.
#[async_trait]
pub trait TranscriptionPort: Send + Sync {
    /// Provider name for log attribution and fallback flagging.
    fn name(&self) -> &str;

    /// Cheap liveness check, consulted before fallback binding at turn start.
    async fn health_check(&self) -> bool;

    /// Transcribe the accumulated utterance audio.
    ///
    /// # Errors
    ///
    /// Returns a stage-tagged engine error on failure; this method never
    /// retries internally.
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult>;
}

/// Interface to an external translation engine.
#[async_trait]
pub trait TranslationPort: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> bool;

    /// Translate `text` from `source_lang` to `target_lang`.
    ///
    /// # Errors
    ///
    /// Returns an engine error on failure; the caller never receives a
    /// silently dropped or partial translation.
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Interface to an external language-model engine.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> bool;

    /// Blocking generation: returns the complete response text.
    ///
    /// # Errors
    ///
    /// Returns an engine error on failure.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Streamed generation.
    ///
    /// Implementations send zero or more [`GenerationEvent::TokenChunk`]s
    /// followed by exactly one terminal event (`Done` or `Error`) into `tx`,
    /// and should stop promptly when `cancel` is triggered. Adapters for
    /// callback-style engines bridge into the channel here so consumers can
    /// always pull a plain lazy sequence.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the stream cannot be opened at all.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Interface to an external speech-synthesis engine.
#[async_trait]
pub trait SynthesisPort: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> bool;

    /// Synthesize `text` with the given voice profile.
    ///
    /// # Errors
    ///
    /// Returns an engine error on failure.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesizedAudio>;
}

/// Interface to an external facial-landmark detector.
#[async_trait]
pub trait LandmarkPort: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> bool;

    /// Detect facial landmarks in a video frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BridgeError::NoFaceDetected`] when no face is
    /// visible; callers treat that as a per-frame degradation, not a failure.
    async fn detect(&self, frame: &VideoFrame) -> Result<LandmarkSet>;
}
