//! Pre-recorded audio sources: WAV files and in-memory buffers.
//!
//! Used for offline runs and tests, where the "microphone" is a file. The
//! source is rechunked to the same fixed chunk size as live capture so the
//! rest of the pipeline cannot tell the difference.

use crate::audio::AudioSource;
use crate::error::{BridgeError, Result};
use crate::pipeline::messages::AudioChunk;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// An [`AudioSource`] backed by a sample buffer.
pub struct BufferSource {
    samples: Vec<f32>,
    sample_rate: u32,
    chunk_size: usize,
    position: usize,
}

impl BufferSource {
    /// Create a source from raw mono samples.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            samples,
            sample_rate,
            chunk_size: chunk_size.max(1),
            position: 0,
        }
    }

    /// Load a WAV file with hound, mixing down to mono and normalizing
    /// integer formats to f32.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or uses an unsupported
    /// sample format.
    pub fn from_wav(path: &Path, chunk_size: usize) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| BridgeError::Audio(format!("cannot open {path:?}: {e}")))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| BridgeError::Audio(format!("bad WAV sample: {e}")))?,
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| BridgeError::Audio(format!("bad WAV sample: {e}")))?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples: Vec<f32> = if channels > 1 {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            interleaved
        };

        info!(
            "loaded WAV {path:?}: {:.2}s at {}Hz",
            samples.len() as f32 / spec.sample_rate as f32,
            spec.sample_rate
        );

        Ok(Self::from_samples(samples, spec.sample_rate, chunk_size))
    }

    /// Drain the whole source into a chunk list without going through a
    /// channel. Convenience for one-shot turn submission.
    pub fn into_chunks(mut self) -> Vec<AudioChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk() {
            chunks.push(chunk);
        }
        chunks
    }

    fn next_chunk(&mut self) -> Option<AudioChunk> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let chunk = AudioChunk {
            samples: self.samples[self.position..end].to_vec(),
            sample_rate: self.sample_rate,
            channels: 1,
            captured_at: Instant::now(),
        };
        self.position = end;
        Some(chunk)
    }
}

#[async_trait]
impl AudioSource for BufferSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn run(&mut self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()> {
        while let Some(chunk) = self.next_chunk() {
            tokio::select! {
                () = cancel.cancelled() => break,
                res = tx.send(chunk) => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
