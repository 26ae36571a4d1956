//! Stage orchestration for a single conversation turn.
//!
//! The coordinator owns the port bindings and drives one turn at a time
//! through transcription, translation, generation, synthesis, and
//! animation. Each stage runs under its own deadline and a shared
//! cancellation token; failures stop the turn at the failing stage while
//! preserving everything the earlier stages produced.

use crate::animation::{pace_frame, AnimationSynchronizer, FrameSequence, LandmarkUpdate};
use crate::audio::PlaybackSink;
use crate::config::BridgeConfig;
use crate::conversation::ConversationManager;
use crate::error::{BridgeError, Result};
use crate::pipeline::messages::{
    AnimationFrame, AudioChunk, GenerationEvent, Role, SynthesizedAudio, TurnId, TurnStage,
    Utterance,
};
use crate::ports::demo::{DemoGeneration, DemoSynthesis, DemoTranscription, DemoTranslation};
use crate::ports::{
    GenerationOptions, GenerationPort, SynthesisPort, TranscriptionPort, TranslationPort,
};
use crate::runtime::RuntimeEvent;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the per-turn generation broadcast channel.
const GENERATION_BROADCAST_CAPACITY: usize = 64;

/// One binding of every engine port the pipeline needs.
///
/// Landmark detection is not bound here: a live video source attaches
/// through [`PipelineCoordinator::with_landmark_feed`] instead, built with
/// [`crate::animation::landmark_feed`].
#[derive(Clone)]
pub struct PortSet {
    pub transcription: Arc<dyn TranscriptionPort>,
    pub translation: Arc<dyn TranslationPort>,
    pub generation: Arc<dyn GenerationPort>,
    pub synthesis: Arc<dyn SynthesisPort>,
}

impl PortSet {
    /// The built-in offline demo engines.
    pub fn demo(config: &BridgeConfig) -> Self {
        Self {
            transcription: Arc::new(DemoTranscription::default()),
            translation: Arc::new(DemoTranslation),
            generation: Arc::new(DemoGeneration::default()),
            synthesis: Arc::new(DemoSynthesis::new(config.audio.output_sample_rate)),
        }
    }
}

/// Final record of everything a turn produced, including partial results
/// when the turn failed or was cancelled part-way.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub turn_id: TurnId,
    /// Terminal stage: `Complete`, `Cancelled`, or `Failed`.
    pub stage: TurnStage,
    pub transcript: Option<String>,
    pub detected_language: Option<String>,
    pub translated_text: Option<String>,
    pub assistant_text: Option<String>,
    pub audio: Option<SynthesizedAudio>,
    pub frames_emitted: usize,
    /// Stages that ran on the fallback provider instead of the primary.
    pub fallbacks: Vec<TurnStage>,
    /// Failure detail when `stage` is `Failed`.
    pub error: Option<String>,
}

impl TurnResult {
    fn started(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            stage: TurnStage::Idle,
            transcript: None,
            detected_language: None,
            translated_text: None,
            assistant_text: None,
            audio: None,
            frames_emitted: 0,
            fallbacks: Vec::new(),
            error: None,
        }
    }
}

/// Live handle to a running turn.
pub struct TurnHandle {
    pub turn_id: TurnId,
    generation_tx: broadcast::Sender<GenerationEvent>,
    /// Receiver created before the turn task starts, so the first
    /// subscriber observes every token from the beginning of the stream.
    generation_rx: Option<broadcast::Receiver<GenerationEvent>>,
    frames: Option<mpsc::Receiver<AnimationFrame>>,
    result_rx: oneshot::Receiver<TurnResult>,
    cancel: CancellationToken,
}

impl TurnHandle {
    /// Subscribe to the live token stream for this turn.
    ///
    /// The first call returns a receiver opened before the turn started,
    /// so no early tokens are missed; further calls observe from the point
    /// of subscription.
    pub fn subscribe_generation(&mut self) -> broadcast::Receiver<GenerationEvent> {
        match self.generation_rx.take() {
            Some(rx) => rx,
            None => self.generation_tx.subscribe(),
        }
    }

    /// Take the animation frame receiver. Frames back-pressure the
    /// animator through this bounded channel; an untaken receiver lets a
    /// few look-ahead frames queue and then pauses frame production until
    /// the turn is consumed or dropped.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AnimationFrame>> {
        self.frames.take()
    }

    /// Request cooperative cancellation of the turn.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to reach a terminal stage.
    ///
    /// # Errors
    ///
    /// Fails with a channel error if the pipeline task panicked.
    pub async fn wait(self) -> Result<TurnResult> {
        self.result_rx
            .await
            .map_err(|_| BridgeError::Channel("pipeline task dropped its result".into()))
    }
}

/// Drives turns through the pipeline, one at a time.
pub struct PipelineCoordinator {
    config: BridgeConfig,
    ports: PortSet,
    fallbacks: Option<PortSet>,
    manager: Arc<ConversationManager>,
    active: Arc<Mutex<Option<TurnId>>>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    playback: Arc<Mutex<Option<Box<dyn PlaybackSink>>>>,
    landmark_rx: Option<watch::Receiver<Option<LandmarkUpdate>>>,
}

impl PipelineCoordinator {
    pub fn new(config: BridgeConfig, ports: PortSet) -> Self {
        let manager = Arc::new(ConversationManager::new(config.conversation.clone()));
        Self {
            config,
            ports,
            fallbacks: None,
            manager,
            active: Arc::new(Mutex::new(None)),
            runtime_tx: crate::runtime::channel(),
            playback: Arc::new(Mutex::new(None)),
            landmark_rx: None,
        }
    }

    /// Provide a fallback port set, substituted per stage when the primary
    /// fails its health check at turn start.
    pub fn with_fallbacks(mut self, fallbacks: PortSet) -> Self {
        self.fallbacks = Some(fallbacks);
        self
    }

    /// Publish runtime events to an external channel (e.g. a UI).
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = tx;
        self
    }

    /// Attach a live landmark feed (see [`crate::animation::landmark_feed`]);
    /// animation frames are annotated with its most recent observation.
    pub fn with_landmark_feed(
        mut self,
        rx: watch::Receiver<Option<LandmarkUpdate>>,
    ) -> Self {
        self.landmark_rx = Some(rx);
        self
    }

    /// Attach a playback sink; synthesized audio plays concurrently with
    /// frame emission.
    pub fn with_playback(self, sink: Box<dyn PlaybackSink>) -> Self {
        if let Ok(mut slot) = self.playback.lock() {
            *slot = Some(sink);
        }
        self
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    /// The conversation history owner.
    pub fn manager(&self) -> &Arc<ConversationManager> {
        &self.manager
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<crate::pipeline::messages::ConversationTurn> {
        self.manager.history()
    }

    /// Submit one captured user utterance and start a turn.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::TurnActive`] while a previous turn is
    /// still running, or [`BridgeError::EmptyInput`] when `chunks`
    /// contains no samples.
    pub fn submit_user_audio(self: &Arc<Self>, chunks: Vec<AudioChunk>) -> Result<TurnHandle> {
        // Input validation happens before the active slot is claimed, so a
        // rejected submission leaves the pipeline untouched.
        let utterance = self.manager.begin_turn(&chunks)?;
        let turn_id = utterance.id;

        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| BridgeError::Channel("active-turn lock poisoned".into()))?;
            if active.is_some() {
                return Err(BridgeError::TurnActive);
            }
            *active = Some(turn_id);
        }

        let (generation_tx, generation_rx) = broadcast::channel(GENERATION_BROADCAST_CAPACITY);
        let lookahead = self.config.animation.lookahead_frames.max(1);
        let (frames_tx, frames_rx) = mpsc::channel(lookahead);
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let this = Arc::clone(self);
        let task_generation_tx = generation_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = this
                .drive_turn(utterance, task_generation_tx, frames_tx, task_cancel)
                .await;
            if let Ok(mut active) = this.active.lock() {
                *active = None;
            }
            let _ = result_tx.send(result);
        });

        Ok(TurnHandle {
            turn_id,
            generation_tx,
            generation_rx: Some(generation_rx),
            frames: Some(frames_rx),
            result_rx,
            cancel,
        })
    }

    async fn drive_turn(
        &self,
        mut utterance: Utterance,
        generation_tx: broadcast::Sender<GenerationEvent>,
        frames_tx: mpsc::Sender<AnimationFrame>,
        cancel: CancellationToken,
    ) -> TurnResult {
        let turn_id = utterance.id;
        let mut result = TurnResult::started(turn_id);
        let ports = self.resolve_ports(turn_id, &mut result).await;
        let timeouts = &self.config.timeouts;

        // Transcribing
        self.set_stage(turn_id, &mut result, TurnStage::Transcribing);
        let hint = self.config.stt.language_hint.as_deref();
        let outcome = self
            .stage_call(
                TurnStage::Transcribing,
                Duration::from_millis(timeouts.transcription_ms),
                &cancel,
                self.manager
                    .transcribe(&mut utterance, ports.transcription.as_ref(), hint),
            )
            .await;
        if let Err(e) = outcome {
            return self.finish_with_error(result, e, &utterance);
        }
        result.transcript = utterance.transcript.clone();
        result.detected_language = utterance.detected_language.clone();
        self.emit(RuntimeEvent::Transcription {
            turn_id,
            text: utterance.transcript.clone().unwrap_or_default(),
            language: utterance.detected_language.clone(),
        });

        // Translating
        self.set_stage(turn_id, &mut result, TurnStage::Translating);
        let target = self.config.translation.target_language.clone();
        let outcome = self
            .stage_call(
                TurnStage::Translating,
                Duration::from_millis(timeouts.translation_ms),
                &cancel,
                self.manager
                    .translate(&mut utterance, ports.translation.as_ref(), &target),
            )
            .await;
        if let Err(e) = outcome {
            return self.finish_with_error(result, e, &utterance);
        }
        result.translated_text = utterance.translated_text.clone();
        if let Some(text) = &utterance.translated_text {
            self.emit(RuntimeEvent::Translation {
                turn_id,
                text: text.clone(),
            });
        }

        // Generating
        self.set_stage(turn_id, &mut result, TurnStage::Generating);
        let assistant_text = match self
            .run_generation(&utterance, &ports, &generation_tx, &cancel)
            .await
        {
            Ok(text) => text,
            Err(e) => return self.finish_with_error(result, e, &utterance),
        };
        result.assistant_text = Some(assistant_text.clone());
        self.emit(RuntimeEvent::AssistantText {
            turn_id,
            text: assistant_text.clone(),
        });

        // Synthesizing
        self.set_stage(turn_id, &mut result, TurnStage::Synthesizing);
        let voice = self.config.synthesis.voice.clone();
        let audio = match self
            .stage_call(
                TurnStage::Synthesizing,
                Duration::from_millis(timeouts.synthesis_ms),
                &cancel,
                ports.synthesis.synthesize(&assistant_text, &voice),
            )
            .await
        {
            Ok(audio) => audio,
            Err(e) => return self.finish_with_error(result, e, &utterance),
        };
        result.audio = Some(audio.clone());

        // Animating
        self.set_stage(turn_id, &mut result, TurnStage::Animating);
        match self.run_animation(audio, &frames_tx, &cancel).await {
            Ok(frames_emitted) => {
                result.frames_emitted = frames_emitted;
                self.set_stage(turn_id, &mut result, TurnStage::Complete);
                info!("turn {turn_id}: complete ({frames_emitted} frames)");
                result
            }
            Err(e) => self.finish_with_error(result, e, &utterance),
        }
    }

    /// Bind ports for this turn, substituting healthy fallbacks for
    /// primaries that fail their health check. Substitutions are recorded
    /// in the result and announced as runtime events, never silent.
    async fn resolve_ports(&self, turn_id: TurnId, result: &mut TurnResult) -> PortSet {
        let mut bound = self.ports.clone();
        if !self.config.fallback.enabled {
            return bound;
        }
        let Some(fallbacks) = &self.fallbacks else {
            return bound;
        };

        if !bound.transcription.health_check().await
            && fallbacks.transcription.health_check().await
        {
            bound.transcription = Arc::clone(&fallbacks.transcription);
            self.flag_fallback(turn_id, result, TurnStage::Transcribing, bound.transcription.name());
        }
        if !bound.translation.health_check().await && fallbacks.translation.health_check().await {
            bound.translation = Arc::clone(&fallbacks.translation);
            self.flag_fallback(turn_id, result, TurnStage::Translating, bound.translation.name());
        }
        if !bound.generation.health_check().await && fallbacks.generation.health_check().await {
            bound.generation = Arc::clone(&fallbacks.generation);
            self.flag_fallback(turn_id, result, TurnStage::Generating, bound.generation.name());
        }
        if !bound.synthesis.health_check().await && fallbacks.synthesis.health_check().await {
            bound.synthesis = Arc::clone(&fallbacks.synthesis);
            self.flag_fallback(turn_id, result, TurnStage::Synthesizing, bound.synthesis.name());
        }
        bound
    }

    fn flag_fallback(
        &self,
        turn_id: TurnId,
        result: &mut TurnResult,
        stage: TurnStage,
        provider: &str,
    ) {
        warn!("turn {turn_id}: {stage} primary unhealthy, using fallback '{provider}'");
        result.fallbacks.push(stage);
        self.emit(RuntimeEvent::FallbackEngaged {
            turn_id,
            stage,
            provider: provider.to_owned(),
        });
    }

    /// Run one stage future under its deadline and the turn's cancellation
    /// token.
    async fn stage_call<T>(
        &self,
        stage: TurnStage,
        deadline: Duration,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(BridgeError::engine(
                    stage,
                    crate::error::EngineErrorKind::Timeout,
                    format!("no response after {deadline:?}"),
                )),
            },
        }
    }

    /// Pull the generation stream to its terminal event, forwarding tokens
    /// to subscribers and maintaining the history.
    ///
    /// The user turn enters the history once the stream is open, after the
    /// prompt has been assembled, so the current text appears in the prompt
    /// exactly once while still surviving a downstream failure. On
    /// cancellation, partial assistant text is kept in the history;
    /// already-spoken words are part of the conversation.
    async fn run_generation(
        &self,
        utterance: &Utterance,
        ports: &PortSet,
        generation_tx: &broadcast::Sender<GenerationEvent>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let turn_id = utterance.id;
        let options = GenerationOptions::from(&self.config.generation);
        let mut stream = self.manager.generate_streaming(
            utterance,
            Arc::clone(&ports.generation),
            options,
        )?;

        // Appended only after the prompt has been assembled: the in-flight
        // user text goes into the prompt once, as the current message, not
        // again through the history context.
        if let Some(user_text) = utterance.response_text() {
            self.manager.append_turn(turn_id, Role::User, user_text);
        }

        let deadline =
            Instant::now() + Duration::from_millis(self.config.timeouts.generation_ms);
        let mut accumulated = String::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    stream.cancel();
                    let partial = self.drain_cancelled(&mut stream, accumulated).await;
                    if !partial.is_empty() {
                        self.manager.append_turn(turn_id, Role::Assistant, &partial);
                    }
                    return Err(BridgeError::Cancelled);
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    stream.cancel();
                    return Err(BridgeError::engine(
                        TurnStage::Generating,
                        crate::error::EngineErrorKind::Timeout,
                        "generation deadline exceeded",
                    ));
                }
                event = stream.next() => event,
            };

            match event {
                Some(GenerationEvent::TokenChunk(token)) => {
                    accumulated.push_str(&token);
                    let _ = generation_tx.send(GenerationEvent::TokenChunk(token.clone()));
                    self.emit(RuntimeEvent::AssistantToken {
                        turn_id,
                        text: token,
                    });
                }
                Some(GenerationEvent::Done(full)) => {
                    let text = if full.is_empty() { accumulated } else { full };
                    let _ = generation_tx.send(GenerationEvent::Done(text.clone()));
                    self.manager.append_turn(turn_id, Role::Assistant, &text);
                    return Ok(text);
                }
                Some(GenerationEvent::Error(kind)) => {
                    let _ = generation_tx.send(GenerationEvent::Error(kind));
                    // A failed response never enters the history; the user
                    // turn alone stays so a retry has full context.
                    return Err(BridgeError::engine(
                        TurnStage::Generating,
                        kind,
                        "generation stream reported an error",
                    ));
                }
                None => {
                    return Err(BridgeError::engine(
                        TurnStage::Generating,
                        crate::error::EngineErrorKind::InvalidResponse,
                        "generation stream ended without a terminal event",
                    ));
                }
            }
        }
    }

    /// After a cancel request, drain any already-buffered tokens within
    /// the grace window and return the partial text.
    async fn drain_cancelled(
        &self,
        stream: &mut crate::conversation::GenerationStream,
        mut accumulated: String,
    ) -> String {
        let grace = Duration::from_millis(self.config.timeouts.cancel_grace_ms);
        let drain = async {
            while let Some(event) = stream.next().await {
                match event {
                    GenerationEvent::TokenChunk(token) => accumulated.push_str(&token),
                    GenerationEvent::Done(full) if !full.is_empty() => {
                        accumulated = full;
                        break;
                    }
                    _ => break,
                }
            }
            accumulated
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(text) => text,
            Err(_) => {
                debug!("cancel grace period elapsed before the stream settled");
                String::new()
            }
        }
    }

    /// Emit frames for the synthesized audio, paced against playback when
    /// realtime mode is on. Empty audio degrades to a single neutral frame
    /// rather than failing the turn.
    async fn run_animation(
        &self,
        audio: SynthesizedAudio,
        frames_tx: &mpsc::Sender<AnimationFrame>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let synchronizer = AnimationSynchronizer::new(self.config.animation.clone());
        let mut sequence = match synchronizer.frames(audio.clone()) {
            Ok(seq) => seq,
            Err(BridgeError::EmptyAudio) => {
                warn!("synthesis produced no audio, emitting a neutral frame");
                let _ = frames_tx.send(AnimationFrame::neutral()).await;
                return Ok(1);
            }
            Err(e) => return Err(e),
        };
        if let Some(rx) = &self.landmark_rx {
            sequence = sequence.with_landmarks(rx.clone());
        }

        let playback_task = self.start_playback(&audio);
        let playback_start = Instant::now();
        let realtime = self.config.animation.realtime;

        let mut emitted = 0usize;
        while let Some(frame) = self.next_frame_or_cancel(&mut sequence, cancel)? {
            if realtime {
                pace_frame(playback_start, &frame).await;
            }
            if frames_tx.send(frame).await.is_err() {
                // Consumer is gone; stop producing but keep the turn alive
                // so playback finishes and the result is recorded.
                debug!("frame consumer dropped after {emitted} frames");
                break;
            }
            emitted += 1;
        }

        if let Some(task) = playback_task {
            if let Err(e) = task.await {
                warn!("playback task failed: {e}");
            }
        }
        Ok(emitted)
    }

    fn next_frame_or_cancel(
        &self,
        sequence: &mut FrameSequence,
        cancel: &CancellationToken,
    ) -> Result<Option<AnimationFrame>> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        Ok(sequence.next_frame())
    }

    fn start_playback(&self, audio: &SynthesizedAudio) -> Option<tokio::task::JoinHandle<()>> {
        let has_sink = self
            .playback
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        if !has_sink {
            return None;
        }
        let sink = Arc::clone(&self.playback);
        let audio = audio.clone();
        Some(tokio::task::spawn_blocking(move || {
            if let Ok(mut slot) = sink.lock() {
                if let Some(sink) = slot.as_mut() {
                    if let Err(e) = sink.play(&audio) {
                        warn!("audio playback failed: {e}");
                    }
                }
            }
        }))
    }

    fn set_stage(&self, turn_id: TurnId, result: &mut TurnResult, stage: TurnStage) {
        debug!("turn {turn_id}: stage {stage}");
        result.stage = stage;
        self.emit(RuntimeEvent::Stage { turn_id, stage });
    }

    fn finish_with_error(
        &self,
        mut result: TurnResult,
        error: BridgeError,
        utterance: &Utterance,
    ) -> TurnResult {
        // Partials from completed stages survive the failure.
        result.transcript = utterance.transcript.clone();
        result.detected_language = utterance.detected_language.clone();
        if result.translated_text.is_none() {
            result.translated_text = utterance.translated_text.clone();
        }

        let failing_stage = result.stage;
        match &error {
            BridgeError::Cancelled => {
                info!("turn {}: cancelled during {failing_stage}", result.turn_id);
                result.stage = TurnStage::Cancelled;
            }
            other => {
                warn!("turn {}: failed during {failing_stage}: {other}", result.turn_id);
                result.stage = TurnStage::Failed;
                result.error = Some(other.to_string());
                self.emit(RuntimeEvent::TurnFailed {
                    turn_id: result.turn_id,
                    stage: failing_stage,
                    message: other.to_string(),
                });
            }
        }
        result
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.runtime_tx.send(event);
    }
}
