//! Frame-accurate avatar animation derived from synthesized speech.
//!
//! [`AnimationSynchronizer`] slices synthesized audio into per-frame
//! windows and maps each window's energy to mouth openness, layering a
//! deterministic blink timeline and a coarse expression on top. Frame
//! count is fixed up front from the audio duration so the animation and
//! the audio always end together; the synthesizer never stretches or
//! drops audio to fit.

pub mod blink;

pub use blink::BlinkScheduler;

use crate::config::AnimationConfig;
use crate::error::{BridgeError, Result};
use crate::pipeline::messages::{AnimationFrame, Expression, LandmarkSet, SynthesizedAudio};
use crate::ports::{LandmarkPort, VideoFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A timestamped landmark observation from a live video source.
#[derive(Debug, Clone)]
pub struct LandmarkUpdate {
    pub landmarks: LandmarkSet,
    /// Offset from playback start, in seconds.
    pub timestamp_seconds: f32,
}

/// Builds frame sequences from synthesized audio.
pub struct AnimationSynchronizer {
    config: AnimationConfig,
}

impl AnimationSynchronizer {
    pub fn new(config: AnimationConfig) -> Self {
        Self { config }
    }

    /// Target frames per second.
    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    /// Lazily generate the frame sequence for one piece of audio.
    ///
    /// The sequence holds `ceil(duration * fps)` frames; the last window
    /// may cover less than a full frame of samples. Frames are computed
    /// on demand so generation can be paced against playback.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::EmptyAudio`] when the audio has no
    /// samples. Callers treat this as a warning and fall back to a single
    /// neutral frame.
    pub fn frames(&self, audio: SynthesizedAudio) -> Result<FrameSequence> {
        if audio.is_empty() {
            return Err(BridgeError::EmptyAudio);
        }
        let fps = self.config.fps.max(1);
        let duration = audio.duration_seconds();
        let total_frames = (duration * fps as f32).ceil().max(1.0) as usize;
        debug!("animating {duration:.2}s of audio as {total_frames} frames at {fps} fps");

        Ok(FrameSequence {
            audio,
            config: self.config.clone(),
            frame_index: 0,
            total_frames,
            running_max: f32::MIN_POSITIVE,
            smoothed: 0.0,
            blink: BlinkScheduler::new(&self.config),
            landmark_rx: None,
            last_landmarks: None,
        })
    }
}

/// Run a landmark detector over a stream of video frames.
///
/// Frames arrive on `video_rx`; each detection result is published on the
/// returned watch channel as a [`LandmarkUpdate`] stamped with the elapsed
/// time since the feed started. A frame with no visible face keeps the
/// previous observation in place rather than publishing a gap. The task
/// stops when `cancel` fires or the video source closes its channel.
pub fn landmark_feed(
    port: Arc<dyn LandmarkPort>,
    mut video_rx: mpsc::Receiver<VideoFrame>,
    cancel: CancellationToken,
) -> watch::Receiver<Option<LandmarkUpdate>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = video_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            match port.detect(&frame).await {
                Ok(landmarks) => {
                    let update = LandmarkUpdate {
                        landmarks,
                        timestamp_seconds: started.elapsed().as_secs_f32(),
                    };
                    if tx.send(Some(update)).is_err() {
                        break;
                    }
                }
                Err(BridgeError::NoFaceDetected) => {
                    debug!("no face in frame, keeping previous landmarks");
                }
                Err(e) => {
                    warn!("landmark detection failed: {e}");
                }
            }
        }
        debug!("landmark feed stopped after {:?}", started.elapsed());
    });
    rx
}

/// Sleep until `frame`'s presentation time relative to `playback_start`.
///
/// Already-late frames return immediately; the caller keeps emitting so
/// the sequence catches back up rather than drifting.
pub async fn pace_frame(playback_start: Instant, frame: &AnimationFrame) {
    let target = playback_start + Duration::from_secs_f32(frame.timestamp_seconds);
    let now = Instant::now();
    if target > now {
        tokio::time::sleep(target - now).await;
    }
}

/// Lazy iterator over the animation frames for one turn's audio.
pub struct FrameSequence {
    audio: SynthesizedAudio,
    config: AnimationConfig,
    frame_index: usize,
    total_frames: usize,
    /// Running peak RMS used for normalization; grows monotonically over
    /// the sequence so louder passages recalibrate quieter ones.
    running_max: f32,
    /// Smoothed mouth value carried between frames.
    smoothed: f32,
    blink: BlinkScheduler,
    landmark_rx: Option<watch::Receiver<Option<LandmarkUpdate>>>,
    /// Most recent in-order landmark observation, re-used when the video
    /// source momentarily loses the face.
    last_landmarks: Option<LandmarkUpdate>,
}

impl FrameSequence {
    /// Number of frames this sequence will emit in total.
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Attach a live landmark feed. Observations older than the last one
    /// applied are discarded so out-of-order detector results never make
    /// the avatar jump backwards.
    pub fn with_landmarks(mut self, rx: watch::Receiver<Option<LandmarkUpdate>>) -> Self {
        self.landmark_rx = Some(rx);
        self
    }

    /// Compute the next frame, or `None` once the sequence is exhausted.
    pub fn next_frame(&mut self) -> Option<AnimationFrame> {
        if self.frame_index >= self.total_frames {
            return None;
        }
        let fps = self.config.fps.max(1);
        let frame_duration = 1.0 / fps as f32;
        let window = (self.audio.sample_rate as f32 * frame_duration) as usize;
        let start = self.frame_index * window;
        let end = (start + window).min(self.audio.samples.len());

        let rms = if start < end {
            let slice = &self.audio.samples[start..end];
            let sum: f32 = slice.iter().map(|s| s * s).sum();
            (sum / slice.len() as f32).sqrt()
        } else {
            0.0
        };

        if rms > self.running_max {
            self.running_max = rms;
        }
        let normalized = rms / self.running_max;
        let target = (normalized * self.config.mouth_gain).min(1.0);

        // Fast attack, slower release, so onsets read crisply while the
        // mouth closes without flicker.
        let alpha = if target > self.smoothed {
            self.config.mouth_attack
        } else {
            self.config.mouth_release
        };
        self.smoothed += alpha * (target - self.smoothed);
        let mouth_open = self.smoothed.clamp(0.0, 1.0);

        let expression = if mouth_open > 0.7 {
            Expression::Speaking
        } else if mouth_open > 0.3 {
            Expression::Neutral
        } else {
            Expression::Quiet
        };

        let timestamp_seconds = self.frame_index as f32 / fps as f32;
        let eye_blink = self.blink.advance(frame_duration);
        let landmarks = self.current_landmarks();

        let frame = AnimationFrame {
            frame_index: self.frame_index,
            timestamp_seconds,
            mouth_open,
            eye_blink,
            expression,
            landmarks,
        };
        self.frame_index += 1;
        Some(frame)
    }

    fn current_landmarks(&mut self) -> Option<LandmarkSet> {
        if let Some(rx) = &mut self.landmark_rx {
            if let Some(update) = rx.borrow_and_update().clone() {
                let newer = self
                    .last_landmarks
                    .as_ref()
                    .map_or(true, |last| update.timestamp_seconds > last.timestamp_seconds);
                if newer {
                    self.last_landmarks = Some(update);
                }
            }
        }
        self.last_landmarks.as_ref().map(|u| u.landmarks.clone())
    }
}
