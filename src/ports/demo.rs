//! Demo providers: self-contained fallback implementations of every Port.
//!
//! These stand in for real engines when a backend fails its health check at
//! turn start, so an interactive session keeps responding instead of
//! freezing. Substitution is always explicit — the coordinator flags the
//! affected stages in the turn result.

use crate::error::Result;
use crate::pipeline::messages::{GenerationEvent, LandmarkSet, SynthesizedAudio};
use crate::ports::{
    GenerationOptions, GenerationPort, LandmarkPort, SynthesisPort, TranscriptSegment,
    TranscriptionPort, TranscriptionResult, TranslationPort, VideoFrame,
};
use async_trait::async_trait;
use std::f32::consts::PI;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delay between scripted token chunks, to feel like real streaming.
const TOKEN_INTERVAL: Duration = Duration::from_millis(40);

/// Transcription fallback: returns a canned transcript regardless of audio.
#[derive(Debug, Clone)]
pub struct DemoTranscription {
    transcript: String,
    language: String,
}

impl DemoTranscription {
    pub fn new(transcript: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            language: language.into(),
        }
    }
}

impl Default for DemoTranscription {
    fn default() -> Self {
        Self::new("Hello, can you hear me?", "en")
    }
}

#[async_trait]
impl TranscriptionPort for DemoTranscription {
    fn name(&self) -> &str {
        "demo-stt"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let duration = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };
        debug!("demo transcription of {duration:.1}s audio");
        Ok(TranscriptionResult {
            text: self.transcript.clone(),
            detected_language: Some(self.language.clone()),
            segments: vec![TranscriptSegment {
                text: self.transcript.clone(),
                start_seconds: 0.0,
                end_seconds: duration,
            }],
        })
    }
}

/// Translation fallback: passes text through with a language tag so the
/// substitution is visible in the transcript view.
#[derive(Debug, Clone, Default)]
pub struct DemoTranslation;

#[async_trait]
impl TranslationPort for DemoTranslation {
    fn name(&self) -> &str {
        "demo-translation"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> Result<String> {
        Ok(format!("[{target_lang}] {text}"))
    }
}

/// Generation fallback: streams a fixed scripted response word by word.
#[derive(Debug, Clone)]
pub struct DemoGeneration {
    response: String,
}

impl DemoGeneration {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for DemoGeneration {
    fn default() -> Self {
        Self::new("I am running in demo mode right now, but I can still chat with you.")
    }
}

#[async_trait]
impl GenerationPort for DemoGeneration {
    fn name(&self) -> &str {
        "demo-llm"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Ok(self.response.clone())
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut emitted = String::new();
        for word in self.response.split_inclusive(' ') {
            if cancel.is_cancelled() {
                // Cancelled mid-stream: terminate with what was delivered.
                let _ = tx.send(GenerationEvent::Done(emitted.trim_end().to_owned())).await;
                return Ok(());
            }
            emitted.push_str(word);
            if tx
                .send(GenerationEvent::TokenChunk(word.to_owned()))
                .await
                .is_err()
            {
                return Ok(());
            }
            tokio::time::sleep(TOKEN_INTERVAL).await;
        }
        let _ = tx.send(GenerationEvent::Done(self.response.clone())).await;
        Ok(())
    }
}

/// Synthesis fallback: produces a soft amplitude-modulated tone whose
/// duration tracks the text length at a natural speaking rate, so lip-sync
/// and playback still behave plausibly.
#[derive(Debug, Clone)]
pub struct DemoSynthesis {
    sample_rate: u32,
    words_per_minute: f32,
}

impl DemoSynthesis {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            words_per_minute: 150.0,
        }
    }
}

impl Default for DemoSynthesis {
    fn default() -> Self {
        Self::new(24_000)
    }
}

#[async_trait]
impl SynthesisPort for DemoSynthesis {
    fn name(&self) -> &str {
        "demo-tts"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str, _voice: &str) -> Result<SynthesizedAudio> {
        let word_count = text.split_whitespace().count().max(1) as f32;
        let duration_s = (word_count / self.words_per_minute) * 60.0;
        let total = (duration_s * self.sample_rate as f32) as usize;

        // 220Hz carrier with a ~4Hz syllable-ish envelope.
        let mut samples = Vec::with_capacity(total);
        for i in 0..total {
            let t = i as f32 / self.sample_rate as f32;
            let envelope = (2.0 * PI * 4.0 * t).sin().max(0.0);
            samples.push(0.2 * envelope * (2.0 * PI * 220.0 * t).sin());
        }

        Ok(SynthesizedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

/// Landmark detector that reports a fixed neutral face for every frame.
#[derive(Debug, Clone, Default)]
pub struct DemoLandmarks;

#[async_trait]
impl LandmarkPort for DemoLandmarks {
    fn name(&self) -> &str {
        "demo-landmarks"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn detect(&self, _frame: &VideoFrame) -> Result<LandmarkSet> {
        Ok(LandmarkSet {
            points: vec![(0.5, 0.6, 0.0), (0.5, 0.7, 0.0)],
            mouth_open: 0.0,
            eye_blink: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_transcription_reports_duration_segment() {
        let port = DemoTranscription::default();
        let result = port.transcribe(&vec![0.0; 32_000], 16_000, None).await.unwrap();
        assert_eq!(result.detected_language.as_deref(), Some("en"));
        assert_eq!(result.segments.len(), 1);
        assert!((result.segments[0].end_seconds - 2.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn demo_generation_stream_terminates_with_done() {
        let port = DemoGeneration::new("one two three");
        let (tx, mut rx) = mpsc::channel(16);
        port.generate_stream(
            "prompt",
            &GenerationOptions::default(),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut chunks = String::new();
        let mut done = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                GenerationEvent::TokenChunk(t) => chunks.push_str(&t),
                GenerationEvent::Done(full) => done = Some(full),
                GenerationEvent::Error(_) => panic!("unexpected error event"),
            }
        }
        assert_eq!(chunks, "one two three");
        assert_eq!(done.as_deref(), Some("one two three"));
    }

    #[tokio::test]
    async fn demo_synthesis_duration_tracks_word_count() {
        let port = DemoSynthesis::new(16_000);
        let audio = port.synthesize("one two three four five", "default").await.unwrap();
        // 5 words at 150 wpm = 2 seconds.
        assert!((audio.duration_seconds() - 2.0).abs() < 0.05);
        assert!(audio.samples.iter().all(|s| s.abs() <= 0.25));
    }

    #[tokio::test]
    async fn demo_translation_tags_target_language() {
        let port = DemoTranslation;
        let out = port.translate("hello", "en", "es").await.unwrap();
        assert_eq!(out, "[es] hello");
    }
}
