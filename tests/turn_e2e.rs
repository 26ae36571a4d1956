//! End-to-end turn tests against stub engines.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxbridge::animation::landmark_feed;
use voxbridge::ports::demo::DemoLandmarks;
use voxbridge::ports::VideoFrame;
use voxbridge::pipeline::messages::{
    AnimationFrame, AudioChunk, GenerationEvent, Role, SynthesizedAudio, TurnStage,
};
use voxbridge::ports::{
    GenerationOptions, GenerationPort, SynthesisPort, TranscriptionPort, TranscriptionResult,
    TranslationPort,
};
use voxbridge::{BridgeConfig, BridgeError, PipelineCoordinator, PortSet, Result};

struct StubTranscription {
    text: &'static str,
    language: &'static str,
}

#[async_trait]
impl TranscriptionPort for StubTranscription {
    fn name(&self) -> &str {
        "stub-stt"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        Ok(TranscriptionResult {
            text: self.text.to_owned(),
            detected_language: Some(self.language.to_owned()),
            segments: Vec::new(),
        })
    }
}

/// Never answers; used to trigger the stage deadline.
struct StalledTranscription;

#[async_trait]
impl TranscriptionPort for StalledTranscription {
    fn name(&self) -> &str {
        "stalled-stt"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!()
    }
}

/// Fails its health check so the coordinator binds the fallback instead.
struct UnhealthyTranscription;

#[async_trait]
impl TranscriptionPort for UnhealthyTranscription {
    fn name(&self) -> &str {
        "unhealthy-stt"
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn transcribe(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _language_hint: Option<&str>,
    ) -> Result<TranscriptionResult> {
        Err(BridgeError::Audio("engine is down".into()))
    }
}

struct StubTranslation;

#[async_trait]
impl TranslationPort for StubTranslation {
    fn name(&self) -> &str {
        "stub-translate"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String> {
        Ok("hola".to_owned())
    }
}

struct StubGeneration {
    tokens: Vec<&'static str>,
}

#[async_trait]
impl GenerationPort for StubGeneration {
    fn name(&self) -> &str {
        "stub-llm"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Ok(self.tokens.concat())
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
        tx: mpsc::Sender<GenerationEvent>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        for token in &self.tokens {
            let _ = tx.send(GenerationEvent::TokenChunk((*token).to_owned())).await;
        }
        let _ = tx.send(GenerationEvent::Done(self.tokens.concat())).await;
        Ok(())
    }
}

/// Emits one token, then holds the stream open until cancelled.
struct HangingGeneration;

#[async_trait]
impl GenerationPort for HangingGeneration {
    fn name(&self) -> &str {
        "hanging-llm"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Ok(String::new())
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let _ = tx
            .send(GenerationEvent::TokenChunk("partial".to_owned()))
            .await;
        cancel.cancelled().await;
        let _ = tx.send(GenerationEvent::Done("partial".to_owned())).await;
        Ok(())
    }
}

/// Records the prompt it was handed so tests can inspect its shape.
struct RecordingGeneration {
    prompt: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl GenerationPort for RecordingGeneration {
    fn name(&self) -> &str {
        "recording-llm"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        if let Ok(mut slot) = self.prompt.lock() {
            *slot = Some(prompt.to_owned());
        }
        Ok("ok".to_owned())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
        tx: mpsc::Sender<GenerationEvent>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        if let Ok(mut slot) = self.prompt.lock() {
            *slot = Some(prompt.to_owned());
        }
        let _ = tx.send(GenerationEvent::Done("ok".to_owned())).await;
        Ok(())
    }
}

struct StubSynthesis {
    seconds: f32,
}

#[async_trait]
impl SynthesisPort for StubSynthesis {
    fn name(&self) -> &str {
        "stub-tts"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<SynthesizedAudio> {
        let sample_rate = 16_000;
        let n = (self.seconds * sample_rate as f32) as usize;
        Ok(SynthesizedAudio {
            samples: vec![0.0; n],
            sample_rate,
        })
    }
}

fn offline_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.animation.realtime = false;
    config.translation.target_language = "es".to_owned();
    config
}

fn stub_ports() -> PortSet {
    PortSet {
        transcription: Arc::new(StubTranscription {
            text: "hello",
            language: "en",
        }),
        translation: Arc::new(StubTranslation),
        generation: Arc::new(StubGeneration {
            tokens: vec!["¿", "Cómo", " estás?"],
        }),
        synthesis: Arc::new(StubSynthesis { seconds: 1.0 }),
    }
}

fn speech_chunks() -> Vec<AudioChunk> {
    vec![AudioChunk {
        samples: vec![0.2; 8_000],
        sample_rate: 16_000,
        channels: 1,
        captured_at: Instant::now(),
    }]
}

fn drain_frames(
    mut rx: mpsc::Receiver<AnimationFrame>,
) -> tokio::task::JoinHandle<Vec<AnimationFrame>> {
    tokio::spawn(async move {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    })
}

#[tokio::test]
async fn full_turn_produces_history_and_frames() {
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), stub_ports()));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    let frames = drain_frames(handle.take_frames().unwrap());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Complete);
    assert_eq!(result.transcript.as_deref(), Some("hello"));
    assert_eq!(result.detected_language.as_deref(), Some("en"));
    assert_eq!(result.translated_text.as_deref(), Some("hola"));
    assert_eq!(result.assistant_text.as_deref(), Some("¿Cómo estás?"));

    // 1.0s of audio at the default 30 fps.
    let frames = frames.await.unwrap();
    assert_eq!(frames.len(), 30);
    assert_eq!(result.frames_emitted, 30);
    assert_eq!(frames[0].frame_index, 0);
    assert_eq!(frames[0].timestamp_seconds, 0.0);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp_seconds > pair[0].timestamp_seconds);
    }

    // Exactly one user and one assistant turn, in order.
    let history = coordinator.manager().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text, "hola");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, "¿Cómo estás?");
}

#[tokio::test]
async fn subscribers_see_every_token_and_one_terminal_event() {
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), stub_ports()));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    let mut events = handle.subscribe_generation();
    drop(handle.take_frames());

    let collector = tokio::spawn(async move {
        let mut tokens = Vec::new();
        let mut terminals = 0;
        while let Ok(event) = events.recv().await {
            match event {
                GenerationEvent::TokenChunk(t) => tokens.push(t),
                GenerationEvent::Done(_) | GenerationEvent::Error(_) => terminals += 1,
            }
        }
        (tokens, terminals)
    });

    handle.wait().await.unwrap();
    let (tokens, terminals) = collector.await.unwrap();
    assert_eq!(tokens, vec!["¿", "Cómo", " estás?"]);
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn transcription_timeout_fails_the_turn_with_partials_preserved() {
    let mut config = offline_config();
    config.timeouts.transcription_ms = 50;
    let ports = PortSet {
        transcription: Arc::new(StalledTranscription),
        ..stub_ports()
    };
    let coordinator = Arc::new(PipelineCoordinator::new(config, ports));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    drop(handle.take_frames());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Failed);
    assert!(result.transcript.is_none());
    assert!(result.assistant_text.is_none());
    let error = result.error.unwrap();
    assert!(error.contains("transcribing"), "unexpected error: {error}");
    assert!(error.contains("timeout"), "unexpected error: {error}");

    // Nothing entered the history.
    assert!(coordinator.manager().history().is_empty());
}

#[tokio::test]
async fn cancel_during_generation_keeps_partial_assistant_text() {
    let ports = PortSet {
        generation: Arc::new(HangingGeneration),
        ..stub_ports()
    };
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), ports));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    let mut events = handle.subscribe_generation();
    drop(handle.take_frames());

    // Wait for the first token so we cancel mid-generation.
    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, GenerationEvent::TokenChunk(_)));
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.stage, TurnStage::Cancelled);
    assert!(result.error.is_none());
    // Transcription completed before the cancel, so its output survives.
    assert_eq!(result.transcript.as_deref(), Some("hello"));

    // The partial response stays in the history alongside the user turn.
    let history = coordinator.manager().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text, "partial");
}

#[tokio::test]
async fn prompt_carries_the_current_user_text_exactly_once() {
    let prompt = Arc::new(Mutex::new(None));
    let ports = PortSet {
        generation: Arc::new(RecordingGeneration {
            prompt: Arc::clone(&prompt),
        }),
        ..stub_ports()
    };
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), ports));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    drop(handle.take_frames());
    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Complete);

    // The in-flight message appears once, as the current turn, and the
    // prompt closes with the assistant cue.
    let prompt = prompt.lock().unwrap().clone().unwrap();
    assert_eq!(
        prompt.matches("User: hola").count(),
        1,
        "unexpected prompt: {prompt}"
    );
    assert!(prompt.ends_with("Assistant:"), "unexpected prompt: {prompt}");
}

#[tokio::test]
async fn subscribing_after_the_turn_started_still_sees_the_first_token() {
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), stub_ports()));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    drop(handle.take_frames());

    // Let the turn progress well into generation before subscribing; the
    // handle's pre-opened receiver has the early tokens buffered.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut events = handle.subscribe_generation();

    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match first {
        GenerationEvent::TokenChunk(t) => assert_eq!(t, "¿"),
        other => panic!("expected the first token, got {other:?}"),
    }
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn live_landmark_feed_annotates_every_frame() {
    let (video_tx, video_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let feed = landmark_feed(Arc::new(DemoLandmarks), video_rx, cancel.clone());

    video_tx
        .send(VideoFrame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        })
        .await
        .unwrap();
    // Give the detector a moment to publish before the turn starts.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let coordinator = Arc::new(
        PipelineCoordinator::new(offline_config(), stub_ports()).with_landmark_feed(feed),
    );

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    let frames = drain_frames(handle.take_frames().unwrap());
    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Complete);

    let frames = frames.await.unwrap();
    assert!(!frames.is_empty());
    for frame in &frames {
        let landmarks = frame.landmarks.as_ref().unwrap();
        assert_eq!(landmarks.points.len(), 2);
    }
    cancel.cancel();
}

#[tokio::test]
async fn empty_synthesis_degrades_to_one_neutral_frame() {
    let ports = PortSet {
        synthesis: Arc::new(StubSynthesis { seconds: 0.0 }),
        ..stub_ports()
    };
    let coordinator = Arc::new(PipelineCoordinator::new(offline_config(), ports));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    let frames = drain_frames(handle.take_frames().unwrap());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Complete);
    assert_eq!(result.frames_emitted, 1);

    let frames = frames.await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].mouth_open, 0.0);
    assert_eq!(frames[0].eye_blink, 0.0);
}

#[tokio::test]
async fn unhealthy_primary_engages_the_fallback_and_flags_it() {
    let primary = PortSet {
        transcription: Arc::new(UnhealthyTranscription),
        ..stub_ports()
    };
    let coordinator = Arc::new(
        PipelineCoordinator::new(offline_config(), primary).with_fallbacks(stub_ports()),
    );

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    drop(handle.take_frames());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Complete);
    assert_eq!(result.fallbacks, vec![TurnStage::Transcribing]);
    assert_eq!(result.transcript.as_deref(), Some("hello"));
}

#[tokio::test]
async fn fallback_disabled_lets_the_primary_fail() {
    let mut config = offline_config();
    config.fallback.enabled = false;
    let primary = PortSet {
        transcription: Arc::new(UnhealthyTranscription),
        ..stub_ports()
    };
    let coordinator =
        Arc::new(PipelineCoordinator::new(config, primary).with_fallbacks(stub_ports()));

    let mut handle = coordinator.submit_user_audio(speech_chunks()).unwrap();
    drop(handle.take_frames());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.stage, TurnStage::Failed);
    assert!(result.fallbacks.is_empty());
}
