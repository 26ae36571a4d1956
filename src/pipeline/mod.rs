//! Turn pipeline: data model and the coordinator that drives a turn
//! through every stage.

pub mod coordinator;
pub mod messages;

pub use coordinator::{PipelineCoordinator, PortSet, TurnHandle, TurnResult};
pub use messages::{
    AnimationFrame, AudioChunk, ConversationTurn, Expression, GenerationEvent, LandmarkSet, Role,
    SynthesizedAudio, TurnId, TurnStage, Utterance,
};
