//! CLI binary for voxbridge.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxbridge::audio::{AudioSource, BufferSource, CpalCapture, CpalPlayback};
use voxbridge::pipeline::messages::AudioChunk;
use voxbridge::{BridgeConfig, GenerationEvent, PipelineCoordinator, PortSet, TurnStage};

/// VoxBridge: offline voice-translation conversation pipeline.
#[derive(Parser)]
#[command(name = "voxbridge", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Capture one utterance from the microphone and run a turn.
    Chat {
        /// Seconds of microphone audio to capture for the turn.
        #[arg(long, default_value_t = 4.0)]
        seconds: f32,
    },

    /// Run one turn from a pre-recorded WAV file.
    Wav {
        /// Path to the recording.
        path: PathBuf,
    },

    /// List available audio devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxbridge=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        BridgeConfig::load(path)?
    } else {
        BridgeConfig::default()
    };

    match cli.command.unwrap_or(Command::Chat { seconds: 4.0 }) {
        Command::Chat { seconds } => run_chat(config, seconds).await,
        Command::Wav { path } => run_wav(config, &path).await,
        Command::Devices => list_devices(),
    }
}

async fn run_chat(config: BridgeConfig, seconds: f32) -> anyhow::Result<()> {
    println!("VoxBridge v{}", env!("CARGO_PKG_VERSION"));

    let mut capture = CpalCapture::new(&config.audio)?;
    let sample_rate = capture.sample_rate();
    let want_samples = (seconds * sample_rate as f32) as usize;

    println!("Listening for {seconds:.1}s...");
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let capture_cancel = cancel.clone();
    let capture_task = tokio::spawn(async move { capture.run(tx, capture_cancel).await });

    let mut chunks: Vec<AudioChunk> = Vec::new();
    let mut collected = 0usize;
    while collected < want_samples {
        match rx.recv().await {
            Some(chunk) => {
                collected += chunk.samples.len();
                chunks.push(chunk);
            }
            None => break,
        }
    }
    cancel.cancel();
    capture_task.await??;
    info!("captured {collected} samples at {sample_rate} Hz");

    run_turn(config, chunks).await
}

async fn run_wav(config: BridgeConfig, path: &std::path::Path) -> anyhow::Result<()> {
    println!("VoxBridge v{}", env!("CARGO_PKG_VERSION"));

    let source = BufferSource::from_wav(path, config.audio.chunk_size)?;
    let chunks = source.into_chunks();
    run_turn(config, chunks).await
}

async fn run_turn(config: BridgeConfig, chunks: Vec<AudioChunk>) -> anyhow::Result<()> {
    let ports = PortSet::demo(&config);
    let coordinator = PipelineCoordinator::new(config.clone(), ports);
    let coordinator = match CpalPlayback::new(config.audio.output_device.as_deref()) {
        Ok(playback) => coordinator.with_playback(Box::new(playback)),
        Err(e) => {
            info!("no audio output available, running silent: {e}");
            coordinator
        }
    };
    let coordinator = Arc::new(coordinator);

    let mut handle = coordinator.submit_user_audio(chunks)?;
    let mut tokens = handle.subscribe_generation();
    let mut frames = handle
        .take_frames()
        .ok_or_else(|| anyhow::anyhow!("frame receiver already taken"))?;

    let token_task = tokio::spawn(async move {
        use std::io::Write;
        print!("Assistant: ");
        while let Ok(event) = tokens.recv().await {
            match event {
                GenerationEvent::TokenChunk(text) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                GenerationEvent::Done(_) => break,
                GenerationEvent::Error(kind) => {
                    println!("\n[generation failed: {kind}]");
                    break;
                }
            }
        }
        println!();
    });

    let frame_task = tokio::spawn(async move {
        let mut count = 0usize;
        while frames.recv().await.is_some() {
            count += 1;
        }
        count
    });

    let result = handle.wait().await?;
    token_task.await?;
    let frame_count = frame_task.await?;

    match result.stage {
        TurnStage::Complete => {
            if let Some(transcript) = &result.transcript {
                println!("You said: {transcript}");
            }
            if let Some(translated) = &result.translated_text {
                println!("Translated: {translated}");
            }
            println!("Animated {frame_count} frames.");
        }
        stage => {
            println!("Turn ended early ({stage}).");
            if let Some(error) = &result.error {
                println!("  {error}");
            }
        }
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  {name}");
    }
    Ok(())
}
