//! Audio playback to system speakers via cpal.

use crate::error::{BridgeError, Result};
use crate::pipeline::messages::SynthesizedAudio;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// A sink for synthesized audio.
///
/// `play` blocks until the audio has finished, so callers can run it in a
/// blocking task concurrently with animation-frame pacing.
pub trait PlaybackSink: Send {
    /// Play the whole buffer, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns an error if the output device fails.
    fn play(&mut self, audio: &SynthesizedAudio) -> Result<()>;
}

/// Playback sink that discards audio. Used headless and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&mut self, _audio: &SynthesizedAudio) -> Result<()> {
        Ok(())
    }
}

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
}

impl CpalPlayback {
    /// Create a new playback instance.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(output_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = output_device {
            host.output_devices()
                .map_err(|e| BridgeError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| BridgeError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| BridgeError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        Ok(Self { device })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

impl PlaybackSink for CpalPlayback {
    fn play(&mut self, audio: &SynthesizedAudio) -> Result<()> {
        // The stream runs at the audio's own sample rate, so no resampling
        // is needed here.
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: audio.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples: audio.samples.clone(),
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);

        let stream = self
            .device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };

                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| BridgeError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| BridgeError::Audio(format!("failed to start output stream: {e}")))?;

        loop {
            std::thread::sleep(std::time::Duration::from_millis(10));
            let buf = buffer
                .lock()
                .map_err(|e| BridgeError::Audio(format!("playback buffer lock poisoned: {e}")))?;
            if buf.finished {
                break;
            }
        }

        drop(stream);
        Ok(())
    }
}

/// Internal buffer tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}
