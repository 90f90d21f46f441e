//! Stage workers: the control loop shared by the summarizer and
//! synthesizer stages.
//!
//! Each worker waits on its queue's wake signal, then drains the queue:
//! peek the head, transform it through a collaborator, and commit the result
//! downstream only if the head is still the same item. A result for an item
//! that was superseded meanwhile is discarded, releasing whatever it holds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::queue::{BoundedQueue, Wake};
use super::types::{Message, Queued, ReadyAudio, Request, RequestKind, SummaryKind};
use crate::audio::AudioClip;
use crate::error::{Result, SpeakerError};
use crate::summarizer::{SummaryRequest, Summarizer};
use crate::tts::Synthesizer;

/// Stage-specific half of a worker.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Input: Queued + Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    /// Transform one item. Called without any queue lock held.
    async fn process(&self, item: &Self::Input) -> Result<Self::Output>;

    /// Hand a committed result to the next queue.
    fn forward(&self, item: Self::Input, output: Self::Output);
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Stale,
    Failed,
    Shutdown,
}

pub struct StageWorker<S: Stage> {
    stage: S,
    queue: Arc<BoundedQueue<S::Input>>,
    shutdown: CancellationToken,
    wait: Duration,
}

impl<S: Stage> StageWorker<S> {
    pub fn new(
        stage: S,
        queue: Arc<BoundedQueue<S::Input>>,
        shutdown: CancellationToken,
        wait: Duration,
    ) -> Self {
        Self {
            stage,
            queue,
            shutdown,
            wait,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let name = self.stage.name();
        debug!(stage = name, "Worker started");

        while !self.shutdown.is_cancelled() {
            match self.queue.wake().wait(self.wait, &self.shutdown).await {
                Wake::Signalled => self.drain().await,
                Wake::TimedOut => {}
                Wake::Shutdown => break,
            }
        }

        debug!(stage = name, "Worker stopped");
    }

    /// Process items until the queue is empty or shutdown is requested.
    pub async fn drain(&self) {
        while !self.shutdown.is_cancelled() {
            let Some(item) = self.queue.peek() else {
                break;
            };
            let span = info_span!("request", id = %item.correlation_id());
            if self.process_one(item).instrument(span).await == Outcome::Shutdown {
                break;
            }
        }
    }

    async fn process_one(&self, item: S::Input) -> Outcome {
        let name = self.stage.name();
        let t_start = Instant::now();

        let result = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Outcome::Shutdown,
            result = self.stage.process(&item) => result,
        };

        // A call that outlived shutdown must not commit anything.
        if self.shutdown.is_cancelled() {
            debug!(stage = name, "Result discarded at shutdown: {}", item.preview());
            return Outcome::Shutdown;
        }

        match result {
            Err(e) => {
                warn!(stage = name, "Dropped after failure: {e}");
                // Dropped only if nothing superseded it meanwhile.
                self.queue.pop_if_head(item.id());
                Outcome::Failed
            }
            Ok(output) => match self.queue.pop_if_head(item.id()) {
                Some(item) => {
                    debug!(
                        stage = name,
                        "Processed in {:.0}ms: {}",
                        t_start.elapsed().as_secs_f64() * 1000.0,
                        item.preview()
                    );
                    self.stage.forward(item, output);
                    Outcome::Forwarded
                }
                None => {
                    warn!(stage = name, "Discarded (no longer relevant): {}", item.preview());
                    drop(output);
                    Outcome::Stale
                }
            },
        }
    }
}

/// Requests → messages. `Speak` requests pass through unchanged.
pub struct SummarizeStage {
    summarizer: Arc<dyn Summarizer>,
    messages: Arc<BoundedQueue<Message>>,
}

impl SummarizeStage {
    pub fn new(summarizer: Arc<dyn Summarizer>, messages: Arc<BoundedQueue<Message>>) -> Self {
        Self {
            summarizer,
            messages,
        }
    }
}

#[async_trait]
impl Stage for SummarizeStage {
    type Input = Request;
    type Output = String;

    fn name(&self) -> &'static str {
        "summarizer"
    }

    async fn process(&self, req: &Request) -> Result<String> {
        if req.kind == RequestKind::Speak {
            debug!("Speak request ({} chars)", req.content.len());
            return Ok(req.content.clone());
        }

        debug!("Summarization start ({} chars)", req.content.len());
        let summary = self
            .summarizer
            .summarize(SummaryRequest {
                content: &req.content,
                kind: req.summary_kind.unwrap_or(SummaryKind::ShortResponse),
                metadata: req.metadata.as_ref(),
            })
            .await?;

        if summary.text.trim().is_empty() {
            return Err(SpeakerError::Summarize("empty summary".into()));
        }
        Ok(summary.text)
    }

    fn forward(&self, req: Request, text: String) {
        self.messages.push(Message::new(text, Some(req.correlation_id)));
    }
}

/// Messages → ready audio.
pub struct SynthesizeStage {
    synthesizer: Arc<dyn Synthesizer>,
    ready: Arc<BoundedQueue<ReadyAudio>>,
    audio_dir: PathBuf,
}

impl SynthesizeStage {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        ready: Arc<BoundedQueue<ReadyAudio>>,
        audio_dir: PathBuf,
    ) -> Self {
        Self {
            synthesizer,
            ready,
            audio_dir,
        }
    }
}

#[async_trait]
impl Stage for SynthesizeStage {
    type Input = Message;
    type Output = AudioClip;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn process(&self, msg: &Message) -> Result<AudioClip> {
        debug!("Audio generation start ({} chars)", msg.text.len());
        let samples = self.synthesizer.synthesize(&msg.text).await?;
        if samples.is_empty() {
            return Err(SpeakerError::EmptyAudio);
        }
        AudioClip::write(&samples, self.synthesizer.sample_rate(), &self.audio_dir)
    }

    fn forward(&self, msg: Message, clip: AudioClip) {
        self.ready.push(ReadyAudio {
            id: msg.id,
            correlation_id: msg.correlation_id,
            clip,
            text: msg.text,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;
    use crate::pipeline::queue::{NoDropCue, QueueMode};

    /// Uppercases text; optionally blocks until released, or fails on "boom".
    struct Upper {
        gate: Option<Arc<Notify>>,
        cancel_on_call: Option<CancellationToken>,
        started: Arc<Notify>,
        out: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl Upper {
        fn new(gate: Option<Arc<Notify>>) -> Self {
            Self {
                gate,
                cancel_on_call: None,
                started: Arc::new(Notify::new()),
                out: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for Arc<Upper> {
        type Input = Message;
        type Output = String;

        fn name(&self) -> &'static str {
            "upper"
        }

        async fn process(&self, msg: &Message) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            if msg.text == "boom" {
                return Err(SpeakerError::Synthesis("boom".into()));
            }
            Ok(msg.text.to_uppercase())
        }

        fn forward(&self, _msg: Message, output: String) {
            self.out.lock().unwrap().push(output);
        }
    }

    fn queue(mode: QueueMode) -> Arc<BoundedQueue<Message>> {
        Arc::new(BoundedQueue::new("messages", mode, 10, Arc::new(NoDropCue)))
    }

    fn worker(stage: Arc<Upper>, q: &Arc<BoundedQueue<Message>>) -> StageWorker<Arc<Upper>> {
        StageWorker::new(stage, q.clone(), CancellationToken::new(), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn drain_forwards_in_fifo_order() {
        let q = queue(QueueMode::Bounded);
        let stage = Arc::new(Upper::new(None));
        q.push(Message::new("a".into(), None));
        q.push(Message::new("b".into(), None));

        worker(stage.clone(), &q).drain().await;

        assert_eq!(*stage.out.lock().unwrap(), vec!["A", "B"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn failure_drops_item_and_continues() {
        let q = queue(QueueMode::Bounded);
        let stage = Arc::new(Upper::new(None));
        q.push(Message::new("boom".into(), None));
        q.push(Message::new("ok".into(), None));

        worker(stage.clone(), &q).drain().await;

        assert_eq!(*stage.out.lock().unwrap(), vec!["OK"]);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn superseded_result_is_not_forwarded() {
        let q = queue(QueueMode::LatestOnly);
        let gate = Arc::new(Notify::new());
        let stage = Arc::new(Upper::new(Some(gate.clone())));
        q.push(Message::new("old".into(), None));

        let w = worker(stage.clone(), &q);
        let started = stage.started.clone();
        let task = tokio::spawn(async move { w.drain().await });

        // "old" is in flight; supersede it, then let both calls complete.
        started.notified().await;
        q.push(Message::new("new".into(), None));
        gate.notify_one();
        started.notified().await;
        gate.notify_one();
        task.await.unwrap();

        assert_eq!(*stage.out.lock().unwrap(), vec!["NEW"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn shutdown_interrupts_in_flight_call() {
        let q = queue(QueueMode::Bounded);
        let stage = Arc::new(Upper::new(Some(Arc::new(Notify::new()))));
        q.push(Message::new("stuck".into(), None));

        let shutdown = CancellationToken::new();
        let w = StageWorker::new(stage.clone(), q.clone(), shutdown.clone(), Duration::from_millis(50));
        let task = w.spawn();

        stage.started.notified().await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should stop promptly")
            .unwrap();

        assert!(stage.out.lock().unwrap().is_empty());
        // Never committed, so still queued.
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn result_finished_after_shutdown_is_dropped() {
        let q = queue(QueueMode::Bounded);
        let shutdown = CancellationToken::new();
        let mut upper = Upper::new(None);
        // Shutdown lands while the call is running and is not observed by it.
        upper.cancel_on_call = Some(shutdown.clone());
        let stage = Arc::new(upper);
        q.push(Message::new("late".into(), None));

        let w = StageWorker::new(stage.clone(), q.clone(), shutdown, Duration::from_millis(50));
        w.drain().await;

        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
        assert!(stage.out.lock().unwrap().is_empty());
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn run_wakes_on_push() {
        let q = queue(QueueMode::Bounded);
        let stage = Arc::new(Upper::new(None));
        let shutdown = CancellationToken::new();
        let task = StageWorker::new(stage.clone(), q.clone(), shutdown.clone(), Duration::from_secs(5)).spawn();

        q.push(Message::new("hi".into(), None));
        for _ in 0..50 {
            if !stage.out.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(*stage.out.lock().unwrap(), vec!["HI"]);
    }
}
