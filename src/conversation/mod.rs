//! Conversation management: turn sequencing and history ownership.
//!
//! [`ConversationManager`] drives one turn through transcription,
//! translation, and streamed generation, and is the sole owner of the
//! append-only conversation history. Engine errors are classified and
//! propagated — retry and fallback policy live one layer up in the
//! coordinator so the UI can observe them.

pub mod stream;

pub use stream::GenerationStream;

use crate::config::ConversationConfig;
use crate::error::{BridgeError, Result};
use crate::pipeline::messages::{AudioChunk, ConversationTurn, Role, TurnId, Utterance};
use crate::ports::{GenerationOptions, GenerationPort, TranscriptionPort, TranslationPort};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffer size for the generation event channel.
const GENERATION_CHANNEL_SIZE: usize = 32;

/// Append-only conversation history.
///
/// Owned exclusively by the manager; external access goes through snapshot
/// reads. Single writer, multiple reader snapshots — no fine-grained
/// locking.
#[derive(Debug, Default)]
struct ConversationState {
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    fn append(&mut self, turn: ConversationTurn, max_turns: usize) {
        self.turns.push(turn);
        if max_turns > 0 && self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }
}

/// Sequences one turn through the external engines and owns the history.
pub struct ConversationManager {
    config: ConversationConfig,
    state: Arc<RwLock<ConversationState>>,
}

impl ConversationManager {
    /// Create a manager with an empty history.
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConversationState::default())),
        }
    }

    /// Start a new turn from captured audio chunks.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::EmptyInput`] when no chunks were captured
    /// or all chunks are empty.
    pub fn begin_turn(&self, audio: &[AudioChunk]) -> Result<Utterance> {
        let total: usize = audio.iter().map(|c| c.samples.len()).sum();
        if total == 0 {
            return Err(BridgeError::EmptyInput(
                "no audio captured for this turn".into(),
            ));
        }

        let mut raw_audio = Vec::with_capacity(total);
        for chunk in audio {
            raw_audio.extend_from_slice(&chunk.samples);
        }
        let sample_rate = audio[0].sample_rate;

        let id = TurnId::new();
        debug!(
            "turn {id}: {total} samples ({:.2}s)",
            total as f32 / sample_rate as f32
        );

        Ok(Utterance {
            id,
            raw_audio,
            sample_rate,
            transcript: None,
            detected_language: None,
            translated_text: None,
        })
    }

    /// Transcribe the utterance's raw audio, setting transcript and
    /// detected language on success.
    ///
    /// No retries happen here — the caller decides retry vs. abort.
    ///
    /// # Errors
    ///
    /// Propagates the port's stage-tagged engine error.
    pub async fn transcribe(
        &self,
        utterance: &mut Utterance,
        port: &dyn TranscriptionPort,
        language_hint: Option<&str>,
    ) -> Result<()> {
        let result = port
            .transcribe(&utterance.raw_audio, utterance.sample_rate, language_hint)
            .await?;

        info!(
            "turn {}: transcribed {:?} (language {:?})",
            utterance.id, result.text, result.detected_language
        );
        utterance.transcript = Some(result.text);
        utterance.detected_language = result.detected_language;
        Ok(())
    }

    /// Translate the transcript into `target_lang`.
    ///
    /// Pass-through when the detected language already matches the target.
    /// On engine failure `translated_text` stays unset and the error is
    /// surfaced — text is never silently dropped.
    ///
    /// # Errors
    ///
    /// Propagates the port's engine error, or fails with
    /// [`BridgeError::EmptyInput`] when the utterance has no transcript yet.
    pub async fn translate(
        &self,
        utterance: &mut Utterance,
        port: &dyn TranslationPort,
        target_lang: &str,
    ) -> Result<()> {
        let transcript = utterance
            .transcript
            .as_deref()
            .ok_or_else(|| BridgeError::EmptyInput("translate before transcribe".into()))?;

        let source = utterance.detected_language.as_deref().unwrap_or("");
        if source.eq_ignore_ascii_case(target_lang) {
            debug!("turn {}: translation pass-through ({source})", utterance.id);
            return Ok(());
        }

        let translated = port.translate(transcript, source, target_lang).await?;
        info!("turn {}: translated to {target_lang}: {translated:?}", utterance.id);
        utterance.translated_text = Some(translated);
        Ok(())
    }

    /// Open a streamed generation call for the utterance.
    ///
    /// The prompt is assembled from the system prompt, the most recent
    /// history bounded to `max_context_chars` (oldest turns dropped first,
    /// never splitting a turn), and the utterance's response text.
    ///
    /// The returned stream is pull-based; dropping it sends a best-effort
    /// cancellation signal to the engine.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::EmptyInput`] when the utterance has no
    /// usable text yet.
    pub fn generate_streaming(
        &self,
        utterance: &Utterance,
        port: Arc<dyn GenerationPort>,
        options: GenerationOptions,
    ) -> Result<GenerationStream> {
        let user_text = utterance
            .response_text()
            .ok_or_else(|| BridgeError::EmptyInput("generate before transcribe".into()))?
            .to_owned();

        let prompt = self.build_prompt(&user_text);
        let (tx, rx) = mpsc::channel(GENERATION_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let stream_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = port
                .generate_stream(&prompt, &options, tx, stream_cancel)
                .await
            {
                // The stream could not even be opened; the closed channel
                // surfaces as a terminal Error on the consumer side.
                warn!("generation stream failed to open: {e}");
            }
        });

        Ok(GenerationStream::new(rx, cancel))
    }

    /// Append a turn to the history. O(1), never blocks on engine calls.
    pub fn append_turn(&self, turn_id: TurnId, role: Role, text: &str) {
        let turn = ConversationTurn {
            turn_id,
            role,
            text: text.to_owned(),
            created_at: Utc::now(),
        };
        if let Ok(mut state) = self.state.write() {
            state.append(turn, self.config.max_turns);
        }
    }

    /// Return the most recent turns whose concatenated text length fits in
    /// `max_chars`, oldest-first. A turn's text is never split.
    pub fn get_context(&self, max_chars: usize) -> Vec<ConversationTurn> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        let mut budget = max_chars;
        let mut selected = Vec::new();
        for turn in state.turns.iter().rev() {
            if turn.text.len() > budget {
                break;
            }
            budget -= turn.text.len();
            selected.push(turn.clone());
        }
        selected.reverse();
        selected
    }

    /// Snapshot of the full history.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.state.read().map(|s| s.turns.clone()).unwrap_or_default()
    }

    /// Clear all history.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            state.turns.clear();
        }
    }

    fn build_prompt(&self, user_text: &str) -> String {
        let mut prompt = String::new();
        if !self.config.system_prompt.is_empty() {
            prompt.push_str(&self.config.system_prompt);
            prompt.push_str("\n\n");
        }
        for turn in self.get_context(self.config.max_context_chars) {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.text));
        }
        prompt.push_str(&format!("{}: {}\n{}:", Role::User, user_text, Role::Assistant));
        prompt
    }
}
