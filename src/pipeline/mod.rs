//! Three-stage notification pipeline.
//!
//! ```text
//! requests ─▶ summarizer ─▶ messages ─▶ synthesizer ─▶ ready audio ─▶ player
//! ```
//!
//! Admission never waits on downstream work. Every queue applies the same
//! bound and drop policy, workers discard results for items that were
//! superseded while in flight, and the player may interrupt a clip once it
//! has played for the configured minimum duration.

mod queue;
mod scheduler;
mod types;
mod worker;

pub use queue::{BoundedQueue, DropListener, DropReason, NoDropCue, QueueMode, Wake, WakeSignal};
pub use scheduler::{NowPlaying, PlaybackPolicy, PlaybackScheduler, PlaybackState, Tick, CUE_CEILING, TICK};
pub use types::{
    sanitize_for_log, short_id, Message, QueueStatus, Queued, ReadyAudio, Request, RequestKind,
    RequestMetadata, SummaryKind,
};
pub use worker::{Outcome, Stage, StageWorker, SummarizeStage, SynthesizeStage};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AudioConfig;
use crate::player::AudioSink;
use crate::sounds::{CueBank, SoundEffects};
use crate::summarizer::Summarizer;
use crate::tts::Synthesizer;

/// Wake wait for the summarizer and synthesizer stages.
pub const STAGE_WAIT: Duration = Duration::from_millis(500);

/// How long `stop` waits for each worker before aborting it.
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Plays the drop cue whenever any queue evicts an item.
struct DropCue {
    sink: Arc<dyn AudioSink>,
    cues: CueBank,
    enabled: bool,
}

impl DropListener for DropCue {
    fn on_drop(&self, queue: &'static str, reason: DropReason) {
        debug!(queue, ?reason, "Item dropped");
        if !self.enabled {
            return;
        }
        if let Some(cues) = self.cues.get() {
            self.sink.play_cue(&cues.drop);
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

pub struct AudioPipeline {
    config: AudioConfig,
    requests: Arc<BoundedQueue<Request>>,
    messages: Arc<BoundedQueue<Message>>,
    ready: Arc<BoundedQueue<ReadyAudio>>,
    summarizer: Arc<dyn Summarizer>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    cues: CueBank,
    now_playing: NowPlaying,
    running: Mutex<Option<Running>>,
}

impl AudioPipeline {
    pub fn new(
        config: AudioConfig,
        summarizer: Arc<dyn Summarizer>,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let cues = CueBank::default();
        let on_drop: Arc<dyn DropListener> = Arc::new(DropCue {
            sink: sink.clone(),
            cues: cues.clone(),
            enabled: config.drop_cue,
        });
        let (mode, max_queue) = (config.queue_mode, config.max_queue);

        Self {
            requests: Arc::new(BoundedQueue::new("requests", mode, max_queue, on_drop.clone())),
            messages: Arc::new(BoundedQueue::new("messages", mode, max_queue, on_drop.clone())),
            ready: Arc::new(BoundedQueue::new("ready_audio", mode, max_queue, on_drop)),
            config,
            summarizer,
            synthesizer,
            sink,
            cues,
            now_playing: NowPlaying::default(),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate the sound cues and spawn the three stage workers.
    pub fn start(&self) {
        let mut running = self.running();
        if running.is_some() {
            warn!("Pipeline already running");
            return;
        }

        let audio_dir = self.config.audio_dir();
        if let Err(e) = std::fs::create_dir_all(&audio_dir) {
            warn!("Failed to create audio dir {}: {e}", audio_dir.display());
        }
        match SoundEffects::generate(self.synthesizer.sample_rate(), &audio_dir) {
            Ok(effects) => self.cues.install(effects),
            Err(e) => warn!("Failed to generate sound effects: {e}"),
        }

        let shutdown = CancellationToken::new();
        let summarize = StageWorker::new(
            SummarizeStage::new(self.summarizer.clone(), self.messages.clone()),
            self.requests.clone(),
            shutdown.clone(),
            STAGE_WAIT,
        );
        let synthesize = StageWorker::new(
            SynthesizeStage::new(self.synthesizer.clone(), self.ready.clone(), audio_dir),
            self.messages.clone(),
            shutdown.clone(),
            STAGE_WAIT,
        );
        let player = PlaybackScheduler::new(
            self.sink.clone(),
            self.ready.clone(),
            self.cues.clone(),
            self.now_playing.clone(),
            PlaybackPolicy::from(&self.config),
        );

        let workers = vec![
            summarize.spawn(),
            synthesize.spawn(),
            tokio::spawn(player.run(shutdown.clone())),
        ];
        *running = Some(Running { shutdown, workers });

        info!(
            mode = ?self.config.queue_mode,
            max_queue = self.config.max_queue,
            interrupt = self.config.interrupt,
            min_duration = self.config.min_duration,
            "Pipeline started"
        );
    }

    /// Stop all workers and release every audio resource the pipeline holds.
    pub async fn stop(&self) {
        let Some(Running { shutdown, workers }) = self.running().take() else {
            return;
        };
        shutdown.cancel();

        for mut handle in workers {
            if tokio::time::timeout(JOIN_GRACE, &mut handle).await.is_err() {
                warn!("Worker did not stop within {JOIN_GRACE:?}, aborting");
                handle.abort();
                // A worker stuck in a blocking call only ends once it returns.
                let _ = handle.await;
            }
        }

        if let Some(clip) = self.sink.stop() {
            drop(clip);
        }
        self.now_playing.set(None);
        self.cues.release();
        let purged = self.ready.clear();
        info!(purged, "Pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Queue a request for summarization (or pass-through for `Speak`).
    pub fn add_request(
        &self,
        kind: RequestKind,
        content: String,
        summary_kind: Option<SummaryKind>,
        metadata: Option<RequestMetadata>,
        correlation_id: Option<String>,
    ) -> Uuid {
        let request = Request::new(kind, content, summary_kind, metadata, correlation_id);
        let id = request.id;
        debug!(id = %request.correlation_id, ?kind, "Request queued: {}", request.preview());
        self.requests.push(request);
        id
    }

    /// Queue text for speech, skipping summarization.
    pub fn add_message(&self, text: String, correlation_id: Option<String>) -> Uuid {
        let message = Message::new(text, correlation_id);
        let id = message.id;
        debug!(id = %message.correlation_id, "Message queued: {}", message.preview());
        self.messages.push(message);
        id
    }

    pub fn get_status(&self) -> QueueStatus {
        let is_playing = self.sink.is_playing();
        QueueStatus {
            pending_requests: self.requests.len(),
            pending_messages: self.messages.len(),
            ready_audio: self.ready.len(),
            is_playing,
            current_text: if is_playing { self.now_playing.get() } else { None },
        }
    }

    /// Empty all three queues. Returns how many items were removed.
    pub fn clear_queue(&self) -> usize {
        let cleared: usize = [
            self.requests.clear(),
            self.messages.clear(),
            self.ready.clear(),
        ]
        .iter()
        .sum();
        info!(cleared, "Queues cleared");
        cleared
    }

    /// Stop the clip that is playing, if any.
    pub fn skip_current(&self) -> bool {
        if !self.sink.is_playing() {
            // Finished on its own but not yet collected by the player.
            if let Some(clip) = self.sink.check_finished() {
                debug!("Collected finished clip");
                drop(clip);
            }
            return false;
        }
        let Some(clip) = self.sink.stop() else {
            return false;
        };
        let text = self.now_playing.get();
        self.now_playing.set(None);
        info!("Skipped: {}", sanitize_for_log(text.as_deref().unwrap_or(""), 50));
        drop(clip);
        true
    }

    pub async fn summarizer_ready(&self) -> bool {
        self.summarizer.health_check().await
    }
}
