//! Audio capture and playback.

pub mod buffer;
pub mod capture;
pub mod playback;

pub use buffer::BufferSource;
pub use capture::CpalCapture;
pub use playback::{CpalPlayback, NullSink, PlaybackSink};

use crate::error::Result;
use crate::pipeline::messages::AudioChunk;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A producer of fixed-size audio chunks: either the microphone or a
/// pre-recorded buffer.
#[async_trait]
pub trait AudioSource: Send {
    /// Sample rate of the chunks this source emits.
    fn sample_rate(&self) -> u32;

    /// Run the source, sending chunks to `tx` until the source is exhausted
    /// or `cancel` is triggered. The channel closes when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying device or file fails.
    async fn run(&mut self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()>;
}
