//! code-speaker-rs: spoken notifications server for Claude Code hooks.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use code_speaker_rs::api::{self, ApiState};
use code_speaker_rs::config::{Config, SummarizerBackend};
use code_speaker_rs::pipeline::{AudioPipeline, QueueMode};
use code_speaker_rs::player::RodioPlayer;
use code_speaker_rs::summarizer::{self, Summarizer};
use code_speaker_rs::tts::KokoroTtsEngine;

#[derive(Parser, Debug)]
#[command(name = "code-speaker-rs", about = "Spoken notifications for Claude Code")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP API to
    #[arg(long)]
    host: Option<String>,

    /// Port for the HTTP API
    #[arg(short, long)]
    port: Option<u16>,

    /// Queue admission policy
    #[arg(long, value_enum)]
    queue_mode: Option<QueueMode>,

    /// Maximum items per queue
    #[arg(long)]
    max_queue: Option<usize>,

    /// Let newer audio interrupt the clip that is playing
    #[arg(long)]
    interrupt: Option<bool>,

    /// Seconds a clip plays before it may be interrupted
    #[arg(long)]
    min_duration: Option<f64>,

    /// Play a chime before interrupting
    #[arg(long)]
    interrupt_cue: Option<bool>,

    /// Play a pluck when a queued item is dropped
    #[arg(long)]
    drop_cue: Option<bool>,

    /// Summarizer backend
    #[arg(long, value_enum)]
    summarizer: Option<SummarizerBackend>,

    /// Kokoro voice name
    #[arg(long)]
    voice: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(mode) = self.queue_mode {
            config.audio.queue_mode = mode;
        }
        if let Some(max_queue) = self.max_queue {
            config.audio.max_queue = max_queue;
        }
        if let Some(interrupt) = self.interrupt {
            config.audio.interrupt = interrupt;
        }
        if let Some(min_duration) = self.min_duration {
            config.audio.min_duration = min_duration;
        }
        if let Some(cue) = self.interrupt_cue {
            config.audio.interrupt_cue = cue;
        }
        if let Some(cue) = self.drop_cue {
            config.audio.drop_cue = cue;
        }
        if let Some(backend) = self.summarizer {
            config.summarizer.backend = backend;
        }
        if let Some(voice) = self.voice {
            config.tts.voice = voice;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let verbose = args.verbose;

    let mut config = Config::load(args.config.as_deref());

    // Initialize logging (suppress noisy ort/hyper internals)
    let level = if verbose { "debug" } else { config.server.log_level.as_str() };
    let filter = EnvFilter::new(format!("{level},ort=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("code-speaker-rs starting");

    args.apply(&mut config);
    config.validate()?;

    let summarizer: Arc<dyn Summarizer> = summarizer::from_config(&config.summarizer)?.into();
    info!("Summarizer backend: {:?}", config.summarizer.backend);

    // Load Kokoro model (blocking, takes a few seconds)
    info!("Loading Kokoro TTS model...");
    let tts = tokio::task::spawn_blocking({
        let tts_config = config.tts.clone();
        move || KokoroTtsEngine::load(&tts_config)
    })
    .await??;
    info!("TTS ready (voice: {}, speed: {})", tts.voice(), config.tts.speed);
    debug!("Available voices: {}", tts.list_voices().join(", "));

    let player = RodioPlayer::open()?;

    let pipeline = Arc::new(AudioPipeline::new(
        config.audio.clone(),
        summarizer,
        Arc::new(tts),
        Arc::new(player),
    ));
    pipeline.start();

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
            }
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = ApiState {
        pipeline: pipeline.clone(),
        tts_ready: true,
    };
    let served = api::serve(state, &addr, shutdown).await;

    pipeline.stop().await;
    served?;

    Ok(())
}
