//! VoxBridge: offline voice-translation conversation pipeline.
//!
//! This crate provides a cascaded pipeline for translated voice
//! conversations with an animated avatar:
//! Microphone → STT → Translation → LLM → TTS → Avatar + Speaker
//!
//! # Architecture
//!
//! The pipeline is built from independent stages connected by async
//! channels:
//! - **Audio capture**: Records from the microphone via `cpal`, or replays
//!   a WAV buffer for offline use
//! - **Transcription**: Speech-to-text behind [`ports::TranscriptionPort`]
//! - **Translation**: Cross-language text behind [`ports::TranslationPort`]
//! - **Generation**: Streamed LLM responses behind [`ports::GenerationPort`]
//! - **Synthesis**: Text-to-speech behind [`ports::SynthesisPort`]
//! - **Animation**: Frame-accurate avatar lip-sync derived from the
//!   synthesized audio
//!
//! Every engine sits behind a port trait, so the same pipeline runs
//! against real local models or the built-in demo engines. The
//! [`PipelineCoordinator`] drives one turn at a time and publishes
//! [`RuntimeEvent`]s for observers.

pub mod animation;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod runtime;

pub use config::BridgeConfig;
pub use conversation::{ConversationManager, GenerationStream};
pub use error::{BridgeError, EngineErrorKind, Result};
pub use pipeline::{
    AnimationFrame, AudioChunk, GenerationEvent, PipelineCoordinator, PortSet, TurnHandle,
    TurnResult, TurnStage,
};
pub use runtime::RuntimeEvent;
