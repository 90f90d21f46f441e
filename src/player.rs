//! Audio output: the single playback sink used by the player stage.

use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::mixer::Mixer;
use rodio::{OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use crate::audio::AudioClip;
use crate::error::{Result, SpeakerError};

/// Poll interval while waiting for a cue to finish.
const CUE_POLL: Duration = Duration::from_millis(20);

/// Playback device as seen by the scheduler.
///
/// The sink owns the clip it is playing; `stop` and `check_finished` hand it
/// back so the caller decides when it is released.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start playing `clip`, replacing anything already playing.
    fn play(&self, clip: AudioClip) -> Result<()>;

    /// Stop playback and return the clip that was playing.
    fn stop(&self) -> Option<AudioClip>;

    fn is_playing(&self) -> bool;

    /// Time since the current clip started, if one is playing.
    fn elapsed(&self) -> Option<Duration>;

    /// Return the current clip if it has just finished on its own.
    fn check_finished(&self) -> Option<AudioClip>;

    /// Play a short cue without waiting for it.
    fn play_cue(&self, cue: &AudioClip);

    /// Play a cue and wait for it, stopping it if it runs past `ceiling`.
    async fn play_cue_and_wait(&self, cue: &AudioClip, ceiling: Duration);
}

struct Playback {
    sink: Sink,
    clip: AudioClip,
    started: Instant,
}

/// rodio-backed sink on the default output device.
///
/// `rodio::OutputStream` is `!Send` on some platforms, so it lives on its own
/// thread for as long as the player exists; the player only keeps the mixer.
pub struct RodioPlayer {
    mixer: Mixer,
    current: Mutex<Option<Playback>>,
    // Dropping the sender ends the stream thread.
    _stream_guard: mpsc::Sender<()>,
}

impl RodioPlayer {
    pub fn open() -> Result<Self> {
        let (mixer_tx, mixer_rx) = mpsc::channel::<Result<Mixer>>();
        let (guard_tx, guard_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("code-speaker-audio".into())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = mixer_tx.send(Err(SpeakerError::Audio(format!(
                            "Failed to open audio output: {e}"
                        ))));
                        return;
                    }
                };
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));
                // Blocks until the player is dropped.
                let _ = guard_rx.recv();
                drop(stream);
            })?;

        let mixer = mixer_rx
            .recv()
            .map_err(|_| SpeakerError::Audio("Audio thread exited during startup".into()))??;
        info!("Audio output opened");
        Ok(Self {
            mixer,
            current: Mutex::new(None),
            _stream_guard: guard_tx,
        })
    }

    fn current(&self) -> MutexGuard<'_, Option<Playback>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink_for(&self, clip: &AudioClip) -> Result<Sink> {
        let samples = clip.read_samples()?;
        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(&self.mixer);
        sink.append(SamplesBuffer::new(1, clip.sample_rate(), samples));
        Ok(sink)
    }
}

#[async_trait]
impl AudioSink for RodioPlayer {
    fn play(&self, clip: AudioClip) -> Result<()> {
        let sink = self.sink_for(&clip)?;
        let previous = self.current().replace(Playback {
            sink,
            clip,
            started: Instant::now(),
        });
        if let Some(previous) = previous {
            previous.sink.stop();
        }
        Ok(())
    }

    fn stop(&self) -> Option<AudioClip> {
        let playback = self.current().take()?;
        playback.sink.stop();
        debug!("Playback stopped after {:?}", playback.started.elapsed());
        Some(playback.clip)
    }

    fn is_playing(&self) -> bool {
        self.current().as_ref().is_some_and(|p| !p.sink.empty())
    }

    fn elapsed(&self) -> Option<Duration> {
        self.current().as_ref().map(|p| p.started.elapsed())
    }

    fn check_finished(&self) -> Option<AudioClip> {
        let mut current = self.current();
        if current.as_ref().is_some_and(|p| p.sink.empty()) {
            current.take().map(|p| p.clip)
        } else {
            None
        }
    }

    fn play_cue(&self, cue: &AudioClip) {
        match self.sink_for(cue) {
            // Detached sinks play to the end on their own.
            Ok(sink) => sink.detach(),
            Err(e) => warn!("Failed to play cue: {e}"),
        }
    }

    async fn play_cue_and_wait(&self, cue: &AudioClip, ceiling: Duration) {
        let sink = match self.sink_for(cue) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Failed to play cue: {e}");
                return;
            }
        };

        let finished = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            while !sink.empty() {
                if start.elapsed() >= ceiling {
                    sink.stop();
                    return false;
                }
                std::thread::sleep(CUE_POLL);
            }
            true
        })
        .await
        .unwrap_or(false);

        if !finished {
            debug!("Cue overran {ceiling:?} and was stopped");
        }
    }
}
