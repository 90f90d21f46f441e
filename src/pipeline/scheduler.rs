//! Player stage: decides each tick whether to start, keep, or interrupt
//! playback.
//!
//! Idle → Playing → Idle, either because the clip finished or because newer
//! ready audio interrupted it. Interruption is only allowed once the current
//! clip has played for `min_duration`, and is announced with a chime.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use super::queue::{BoundedQueue, Wake};
use super::types::{sanitize_for_log, ReadyAudio};
use crate::config::AudioConfig;
use crate::player::AudioSink;
use crate::sounds::CueBank;

/// Wait between ticks when nothing signals the player.
pub const TICK: Duration = Duration::from_millis(100);

/// Longest the interrupt chime may play before it is cut off.
pub const CUE_CEILING: Duration = Duration::from_secs(1);

/// Interruption rules for the player stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackPolicy {
    pub interrupt: bool,
    pub min_duration: Duration,
    pub interrupt_cue: bool,
    pub cue_ceiling: Duration,
}

impl From<&AudioConfig> for PlaybackPolicy {
    fn from(config: &AudioConfig) -> Self {
        Self {
            interrupt: config.interrupt,
            min_duration: Duration::from_secs_f64(config.min_duration.max(0.0)),
            interrupt_cue: config.interrupt_cue,
            cue_ceiling: CUE_CEILING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No ready audio.
    Empty,
    /// Started the next clip from idle.
    Started,
    /// Playing and interruption is disabled; ready audio waits.
    Waiting,
    /// Playing for less than `min_duration`.
    GracePeriod,
    /// Stopped the current clip and started the next.
    Interrupted,
    /// Tried to start a clip but the sink refused it.
    PlayFailed,
}

/// Text of the clip currently playing, shared with status queries.
#[derive(Clone, Default)]
pub struct NowPlaying(Arc<Mutex<Option<String>>>);

impl NowPlaying {
    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, text: Option<String>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = text;
    }
}

pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    ready: Arc<BoundedQueue<ReadyAudio>>,
    cues: CueBank,
    now_playing: NowPlaying,
    policy: PlaybackPolicy,
}

impl PlaybackScheduler {
    pub fn new(
        sink: Arc<dyn AudioSink>,
        ready: Arc<BoundedQueue<ReadyAudio>>,
        cues: CueBank,
        now_playing: NowPlaying,
        policy: PlaybackPolicy,
    ) -> Self {
        Self {
            sink,
            ready,
            cues,
            now_playing,
            policy,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.sink.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        debug!("Playback worker started");

        loop {
            if self.ready.wake().wait(TICK, &shutdown).await == Wake::Shutdown {
                break;
            }
            self.tick().await;
        }

        if let Some(clip) = self.sink.stop() {
            drop(clip);
        }
        self.now_playing.set(None);
        debug!("Playback worker stopped");
    }

    pub async fn tick(&self) -> Tick {
        if let Some(clip) = self.sink.check_finished() {
            debug!("Audio end");
            drop(clip);
        }
        // The clip may also have been collected by a skip.
        if self.state() == PlaybackState::Idle {
            self.now_playing.set(None);
        }

        if self.ready.is_empty() {
            return Tick::Empty;
        }

        if self.state() == PlaybackState::Playing {
            if !self.policy.interrupt {
                return Tick::Waiting;
            }
            if self
                .sink
                .elapsed()
                .is_some_and(|elapsed| elapsed < self.policy.min_duration)
            {
                return Tick::GracePeriod;
            }

            debug!("Interrupting current audio");
            if let Some(clip) = self.sink.stop() {
                drop(clip);
            }
            self.now_playing.set(None);

            if self.policy.interrupt_cue {
                if let Some(cues) = self.cues.get() {
                    self.sink
                        .play_cue_and_wait(&cues.interrupt, self.policy.cue_ceiling)
                        .await;
                }
            }

            return match self.start_next() {
                Tick::Started => Tick::Interrupted,
                other => other,
            };
        }

        self.start_next()
    }

    /// Pop the next ready clip and hand it to the sink.
    fn start_next(&self) -> Tick {
        let Some(next) = self.ready.pop() else {
            return Tick::Empty;
        };
        let ReadyAudio {
            correlation_id,
            clip,
            text,
            ..
        } = next;

        let _span = info_span!("request", id = %correlation_id).entered();
        info!("Playing: {}", sanitize_for_log(&text, 80));

        match self.sink.play(clip) {
            Ok(()) => {
                self.now_playing.set(Some(text));
                debug!("Audio start");
                Tick::Started
            }
            Err(e) => {
                warn!("Playback failed: {e}");
                Tick::PlayFailed
            }
        }
    }
}
