//! Fake collaborators shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use code_speaker_rs::audio::AudioClip;
use code_speaker_rs::config::AudioConfig;
use code_speaker_rs::error::{Result, SpeakerError};
use code_speaker_rs::pipeline::{AudioPipeline, SummaryKind};
use code_speaker_rs::player::AudioSink;
use code_speaker_rs::summarizer::{Summarizer, Summary, SummaryRequest};
use code_speaker_rs::tts::Synthesizer;

/// Echoes `summary: <content>`; content "fail" fails.
#[derive(Default)]
pub struct FakeSummarizer {
    pub calls: Mutex<Vec<(String, SummaryKind)>>,
    pub unhealthy: bool,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<Summary> {
        self.calls
            .lock()
            .unwrap()
            .push((request.content.to_string(), request.kind));
        if request.content == "fail" {
            return Err(SpeakerError::Summarize("backend down".into()));
        }
        Ok(Summary {
            text: format!("summary: {}", request.content),
            model: "fake".into(),
            latency_ms: 0.0,
        })
    }

    async fn health_check(&self) -> bool {
        !self.unhealthy
    }
}

/// Returns a short silent buffer; "fail" fails, "silent" returns nothing.
/// With a gate, every call waits for one permit. With a stall, every call
/// blocks its worker thread, deaf to cancellation.
#[derive(Default)]
pub struct FakeSynth {
    pub calls: Mutex<Vec<String>>,
    pub gate: Option<Arc<Semaphore>>,
    pub stall: Option<Duration>,
}

impl FakeSynth {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    /// Needs a multi-threaded runtime.
    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::default()
        }
    }

    pub fn called(&self, text: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|t| t == text)
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(stall) = self.stall {
            tokio::task::block_in_place(|| std::thread::sleep(stall));
        }
        match text {
            "fail" => Err(SpeakerError::Synthesis("model error".into())),
            "silent" => Ok(Vec::new()),
            _ => Ok(vec![0.0; 240]),
        }
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

/// Sink that "plays" until told to finish.
#[derive(Default)]
pub struct FakeSink {
    current: Mutex<Option<(AudioClip, Instant)>>,
    finished: Mutex<bool>,
    pub plays: Mutex<usize>,
    pub stops: Mutex<usize>,
    pub drop_cues: Mutex<usize>,
    pub interrupt_cues: Mutex<usize>,
}

impl FakeSink {
    pub fn finish(&self) {
        *self.finished.lock().unwrap() = true;
    }

    pub fn plays(&self) -> usize {
        *self.plays.lock().unwrap()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    fn play(&self, clip: AudioClip) -> Result<()> {
        assert!(clip.path().exists(), "played a released clip");
        *self.plays.lock().unwrap() += 1;
        *self.finished.lock().unwrap() = false;
        *self.current.lock().unwrap() = Some((clip, Instant::now()));
        Ok(())
    }

    fn stop(&self) -> Option<AudioClip> {
        let clip = self.current.lock().unwrap().take().map(|(clip, _)| clip);
        if clip.is_some() {
            *self.stops.lock().unwrap() += 1;
        }
        clip
    }

    fn is_playing(&self) -> bool {
        self.current.lock().unwrap().is_some() && !*self.finished.lock().unwrap()
    }

    fn elapsed(&self) -> Option<Duration> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, started)| started.elapsed())
    }

    fn check_finished(&self) -> Option<AudioClip> {
        if *self.finished.lock().unwrap() {
            self.current.lock().unwrap().take().map(|(clip, _)| clip)
        } else {
            None
        }
    }

    fn play_cue(&self, _cue: &AudioClip) {
        *self.drop_cues.lock().unwrap() += 1;
    }

    async fn play_cue_and_wait(&self, _cue: &AudioClip, _ceiling: Duration) {
        *self.interrupt_cues.lock().unwrap() += 1;
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub summarizer: Arc<FakeSummarizer>,
    pub synth: Arc<FakeSynth>,
    pub sink: Arc<FakeSink>,
    pub pipeline: Arc<AudioPipeline>,
}

impl Harness {
    pub fn new(configure: impl FnOnce(&mut AudioConfig)) -> Self {
        Self::with_synth(FakeSynth::default(), configure)
    }

    pub fn with_synth(synth: FakeSynth, configure: impl FnOnce(&mut AudioConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AudioConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..AudioConfig::default()
        };
        configure(&mut config);

        let summarizer = Arc::new(FakeSummarizer::default());
        let synth = Arc::new(synth);
        let sink = Arc::new(FakeSink::default());
        let pipeline = Arc::new(AudioPipeline::new(
            config,
            summarizer.clone(),
            synth.clone(),
            sink.clone(),
        ));
        Self {
            dir,
            summarizer,
            synth,
            sink,
            pipeline,
        }
    }

    /// Audio files currently on disk (cue clips included).
    pub fn files(&self) -> usize {
        count_files(self.dir.path())
    }
}

pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
