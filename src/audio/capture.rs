//! Microphone audio capture using cpal.
//!
//! Captures at the device's native sample rate, mixes down to mono, and
//! downsamples to the configured input rate. Output is rechunked to the
//! fixed chunk size the pipeline expects.

use crate::audio::AudioSource;
use crate::config::AudioConfig;
use crate::error::{BridgeError, Result};
use crate::pipeline::messages::AudioChunk;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// Target sample rate for the pipeline (e.g., 16kHz).
    target_sample_rate: u32,
    /// Fixed output chunk size in samples.
    chunk_size: usize,
}

impl CpalCapture {
    /// Create a new capture instance.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then downsamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| BridgeError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| BridgeError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| BridgeError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| BridgeError::Audio(format!("no default input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!("native input config: {native_rate}Hz, {native_channels} channels");
        if native_rate != config.input_sample_rate {
            info!(
                "will downsample from {native_rate}Hz to {}Hz",
                config.input_sample_rate
            );
        }

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            chunk_size: config.chunk_size,
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| BridgeError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl AudioSource for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    async fn run(&mut self, tx: mpsc::Sender<AudioChunk>, cancel: CancellationToken) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let chunk_size = self.chunk_size;
        let tx_clone = tx.clone();

        // Rechunker carries leftover samples between cpal callbacks so every
        // emitted chunk has exactly `chunk_size` samples.
        let mut pending: Vec<f32> = Vec::with_capacity(chunk_size * 2);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };

                    let samples = if native_rate != target_rate {
                        downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };

                    pending.extend_from_slice(&samples);
                    while pending.len() >= chunk_size {
                        let rest = pending.split_off(chunk_size);
                        let chunk = AudioChunk {
                            samples: std::mem::replace(&mut pending, rest),
                            sample_rate: target_rate,
                            channels: 1,
                            captured_at: Instant::now(),
                        };
                        // try_send: never block the audio thread.
                        if tx_clone.try_send(chunk).is_err() {
                            debug!("audio channel full, dropping chunk");
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| BridgeError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| BridgeError::Audio(format!("failed to start input stream: {e}")))?;

        info!("audio capture started: native {native_rate}Hz -> target {target_rate}Hz");

        // Hold the stream alive until cancelled.
        cancel.cancelled().await;

        drop(stream);
        info!("audio capture stopped");
        Ok(())
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// For speech (48kHz → 16kHz) this is sufficient quality: speech energy
/// sits below 8kHz, so no anti-alias filter is needed.
pub(crate) fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_mixdown_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downsample_48k_to_16k_thirds_the_length() {
        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let output = downsample(&input, 48_000, 16_000);
        assert_eq!(output.len(), 160);
        // Monotone input stays monotone through linear interpolation.
        assert!(output.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn downsample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(downsample(&input, 16_000, 16_000), input);
    }
}
