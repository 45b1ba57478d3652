pub mod error;
pub mod validation;

use std::path::PathBuf;

use clap::Parser;
use stream_core::{AudioArtifact, SessionState, StreamConfig, StreamEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::CliError;
use crate::validation::validate_stream_request;

/// Stream synthesized speech from a TTS server and save it as WAV
#[derive(Debug, Parser)]
#[command(name = "tts-stream", version)]
struct Cli {
    /// Text to synthesize
    text: String,

    /// Language code (e.g. en_US, de_DE)
    #[arg(short, long, default_value = "en_US")]
    language: String,

    /// Output WAV file (default: stream-<timestamp>.wav)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the WAV as Base64 to stdout instead of writing a file
    #[arg(long, conflicts_with = "output")]
    base64: bool,

    /// Streaming endpoint, overrides STREAM_ENDPOINT
    #[arg(long)]
    endpoint: Option<String>,

    /// Reconnect attempts before giving up, overrides STREAM_MAX_RECONNECT_ATTEMPTS
    #[arg(long)]
    max_reconnects: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenv::dotenv();

    async_main(Cli::parse()).await
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    validate_stream_request(&cli.text, &cli.language)?;

    let mut config = StreamConfig::from_env();
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(max) = cli.max_reconnects {
        config.max_reconnect_attempts = max;
    }
    info!(
        "Stream configuration loaded: endpoint={}, max_reconnects={}, idle_timeout={}s",
        config.endpoint, config.max_reconnect_attempts, config.idle_timeout_secs
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = stream_core::start_stream(&config, &cli.text, &cli.language, tx);
    info!("Connecting to TTS server... (session {})", handle.id());

    let mut artifact: Option<AudioArtifact> = None;
    let mut mel_frames = 0u64;
    let mut stopping = false;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    StreamEvent::Open => info!("Connected! Streaming audio..."),
                    StreamEvent::Progress(p) => {
                        debug!(chunks = p.chunks, percent = p.percent, "Received chunk");
                    }
                    StreamEvent::MelFrame(_) => mel_frames += 1,
                    StreamEvent::Error(e) => error!("{}", e),
                    StreamEvent::Reconnecting { attempt, max_attempts } => {
                        warn!("Connection lost. Reconnecting... ({}/{})", attempt, max_attempts);
                    }
                    StreamEvent::AudioBlob(blob) => artifact = Some(blob),
                    StreamEvent::Complete { chunk_count, sample_count, .. } => {
                        info!(
                            "Streaming complete! Received {} chunks, {} samples total ({} mel frames)",
                            chunk_count, sample_count, mel_frames
                        );
                    }
                    StreamEvent::Close => break,
                }
            }
            signal = &mut ctrl_c, if !stopping => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                stopping = true;
                if handle.cancel() {
                    info!("Streaming stopped.");
                }
            }
        }
    }

    let state = handle.join().await;
    if let Some(artifact) = artifact {
        write_artifact(&cli, &artifact).await?;
    }

    match state {
        SessionState::Failed => Err(CliError::Ended(state).into()),
        _ => Ok(()),
    }
}

async fn write_artifact(cli: &Cli, artifact: &AudioArtifact) -> Result<(), CliError> {
    if cli.base64 {
        println!("{}", artifact.to_base64());
        return Ok(());
    }

    let path = cli.output.clone().unwrap_or_else(default_output_path);
    artifact.save(&path).await?;
    info!(
        "Saved {} bytes ({} ms at {} Hz) to {}",
        artifact.as_bytes().len(),
        artifact.duration_ms(),
        artifact.sample_rate,
        path.display()
    );
    Ok(())
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "stream-{}.wav",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}
