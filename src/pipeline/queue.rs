//! Bounded pipeline queues with admission/eviction policy and wake signal.
//!
//! Every stage queue uses the same policy, so dropping behaves the same at
//! every stage:
//! - `Bounded`: FIFO, evicting the oldest item once `max_queue` is reached.
//! - `LatestOnly`: admission replaces everything already waiting.
//!
//! Evicted items are reported to a [`DropListener`] and then dropped, which
//! releases any resource they own (audio clips delete their file).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::types::Queued;

/// Admission policy shared by all stage queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    #[default]
    Bounded,
    LatestOnly,
}

/// Why an item left a queue without being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Bounded queue was full.
    Overflow,
    /// Replaced by a newer item in latest-only mode.
    Superseded,
}

/// Notified once per evicted item, whichever queue evicted it.
pub trait DropListener: Send + Sync {
    fn on_drop(&self, queue: &'static str, reason: DropReason);
}

/// Listener that ignores drops.
pub struct NoDropCue;

impl DropListener for NoDropCue {
    fn on_drop(&self, _queue: &'static str, _reason: DropReason) {}
}

/// Outcome of waiting on a [`WakeSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Signalled,
    TimedOut,
    Shutdown,
}

/// Level-triggered "has work" flag.
///
/// Setting it any number of times before a wait wakes exactly one wait;
/// the wait consumes (clears) it.
#[derive(Debug, Default)]
pub struct WakeSignal {
    notify: Notify,
}

impl WakeSignal {
    pub fn set(&self) {
        self.notify.notify_one();
    }

    /// Wait for the signal, at most `timeout`, returning early on shutdown.
    pub async fn wait(&self, timeout: Duration, shutdown: &CancellationToken) -> Wake {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Wake::Shutdown,
            res = tokio::time::timeout(timeout, self.notify.notified()) => match res {
                Ok(()) => Wake::Signalled,
                Err(_) => Wake::TimedOut,
            },
        }
    }
}

/// A capacity-limited FIFO shared between a producer side and one stage worker.
pub struct BoundedQueue<T> {
    name: &'static str,
    mode: QueueMode,
    max_queue: usize,
    items: Mutex<VecDeque<T>>,
    wake: WakeSignal,
    on_drop: Arc<dyn DropListener>,
}

impl<T: Queued> BoundedQueue<T> {
    pub fn new(
        name: &'static str,
        mode: QueueMode,
        max_queue: usize,
        on_drop: Arc<dyn DropListener>,
    ) -> Self {
        Self {
            name,
            mode,
            max_queue: max_queue.max(1),
            items: Mutex::new(VecDeque::new()),
            wake: WakeSignal::default(),
            on_drop,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `item` under the queue's policy and signal the stage.
    pub fn push(&self, item: T) {
        let mut evicted = Vec::new();
        {
            let mut items = self.lock();
            match self.mode {
                QueueMode::Bounded => {
                    while items.len() >= self.max_queue {
                        if let Some(old) = items.pop_front() {
                            evicted.push((old, DropReason::Overflow));
                        }
                    }
                }
                QueueMode::LatestOnly => {
                    evicted.extend(items.drain(..).map(|old| (old, DropReason::Superseded)));
                }
            }
            items.push_back(item);
        }

        self.release(evicted);
        self.wake.set();
    }

    /// In latest-only mode, evict everything but the newest item.
    pub fn reconcile(&self) {
        if self.mode != QueueMode::LatestOnly {
            return;
        }
        let evicted: Vec<_> = {
            let mut items = self.lock();
            let excess = items.len().saturating_sub(1);
            items
                .drain(..excess)
                .map(|old| (old, DropReason::Superseded))
                .collect()
        };
        self.release(evicted);
    }

    /// Reconcile, then return a copy of the head for processing.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.reconcile();
        self.lock().front().cloned()
    }

    /// Pop the head only if it is still the item with `id`.
    ///
    /// `None` means the item was superseded while it was being processed.
    pub fn pop_if_head(&self, id: Uuid) -> Option<T> {
        let mut items = self.lock();
        if items.front().is_some_and(|head| head.id() == id) {
            items.pop_front()
        } else {
            None
        }
    }

    /// Reconcile, then pop the head.
    pub fn pop(&self) -> Option<T> {
        self.reconcile();
        self.lock().pop_front()
    }

    pub fn head_id(&self) -> Option<Uuid> {
        self.lock().front().map(Queued::id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and release every item without drop cues. Returns the count.
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = self.lock().drain(..).collect();
        drained.len()
    }

    /// Report and release evicted items outside the lock.
    fn release(&self, evicted: Vec<(T, DropReason)>) {
        for (item, reason) in evicted {
            match reason {
                DropReason::Overflow => {
                    warn!(queue = self.name, "Queue full, dropped: {}", item.preview());
                }
                DropReason::Superseded => {
                    warn!(queue = self.name, "Dropped (latest-only): {}", item.preview());
                }
            }
            self.on_drop.on_drop(self.name, reason);
        }
    }
}
