//! Ordered speech playback queue
//!
//! Sentences are spoken strictly in arrival order by a single consumer.
//! Enqueueing while idle starts a pump; on completion of each utterance the
//! pump itself checks for further entries, so no poller is needed. Synthesis
//! failures release the queue and advance; `drain_and_stop` clears pending
//! entries atomically and cancels the in-flight utterance.

use crate::engines::{SpeakOutcome, SpeechSynthesizer};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Externally visible speaker state.
///
/// `busy` is held from dequeue until the synthesizer settles the utterance;
/// `speaking` mirrors the engine's own start/finish signal and may lag
/// `busy` by the engine's internal latency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeakerState {
    pub enabled: bool,
    pub speaking: bool,
    pub busy: bool,
}

/// Single-owner lock for one utterance.
///
/// Taken at dequeue time and released exactly once by whichever path fires
/// first (completion, synthesis error, or drain); every later release is a
/// no-op. This is what keeps an error path and a late completion callback
/// from double-releasing the queue's busy flag.
#[derive(Clone)]
pub struct UtteranceLock {
    released: Arc<AtomicBool>,
}

impl UtteranceLock {
    fn new() -> Self {
        Self {
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` only for the first caller.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

struct Inner {
    synth: Arc<dyn SpeechSynthesizer>,
    pending: Mutex<VecDeque<String>>,
    current: Mutex<Option<UtteranceLock>>,
    enabled: AtomicBool,
    busy_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct SpeechQueue {
    inner: Arc<Inner>,
}

impl SpeechQueue {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, enabled: bool) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                synth,
                pending: Mutex::new(VecDeque::new()),
                current: Mutex::new(None),
                enabled: AtomicBool::new(enabled),
                busy_tx,
            }),
        }
    }

    /// Append a sentence; starts the pump only if the queue is idle.
    pub fn enqueue(&self, sentence: impl Into<String>) {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            debug!("speech disabled, dropping sentence");
            return;
        }
        self.inner.pending.lock().push_back(sentence.into());
        // The busy flag doubles as the single-consumer guard: only the
        // caller that flips it false -> true owns the pump.
        if !self.inner.busy_tx.send_replace(true) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                Inner::pump(inner).await;
            });
        }
    }

    /// Clear all pending entries, cancel the in-flight utterance, and wait
    /// until the queue is idle. Nothing enqueued before this call can be
    /// spoken after it resolves.
    pub async fn drain_and_stop(&self) {
        {
            let mut pending = self.inner.pending.lock();
            pending.clear();
            if let Some(lock) = self.inner.current.lock().take() {
                lock.release();
            }
        }
        self.inner.synth.stop();
        self.wait_idle().await;
        debug!("speech queue drained");
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.drain_and_stop().await;
        }
    }

    pub fn speaker_state(&self) -> SpeakerState {
        SpeakerState {
            enabled: self.inner.enabled.load(Ordering::SeqCst),
            speaking: *self.inner.synth.speaking().borrow(),
            busy: *self.inner.busy_tx.borrow(),
        }
    }

    pub fn busy(&self) -> watch::Receiver<bool> {
        self.inner.busy_tx.subscribe()
    }

    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy_tx.subscribe();
        let _ = busy.wait_for(|b| !*b).await;
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }
}

impl Inner {
    fn dequeue(inner: &Inner) -> Option<(String, UtteranceLock)> {
        let mut pending = inner.pending.lock();
        let sentence = pending.pop_front()?;
        let lock = UtteranceLock::new();
        *inner.current.lock() = Some(lock.clone());
        Some((sentence, lock))
    }

    async fn pump(inner: Arc<Inner>) {
        'runs: loop {
            loop {
                let Some((sentence, lock)) = Self::dequeue(&inner) else {
                    break;
                };
                // A drain can settle the utterance between dequeue and here
                if lock.is_released() {
                    continue;
                }

                debug!(chars = sentence.len(), "speaking sentence");
                let outcome = inner.synth.speak(&sentence).await;
                inner.current.lock().take();
                let first_release = lock.release();

                match outcome {
                    Ok(SpeakOutcome::Completed) => debug!("utterance finished"),
                    Ok(SpeakOutcome::Cancelled) => debug!("utterance cancelled"),
                    Err(e) => {
                        if first_release {
                            warn!(error = %e, "speech synthesis failed, advancing");
                        }
                    }
                }

                // Settled elsewhere means a drain ran; stop this run and let
                // a fresh pump pick up anything enqueued afterwards
                if !first_release {
                    break;
                }
            }

            // send_replace stores the value even with no subscriber; a plain
            // send would leave the flag stuck at true
            inner.busy_tx.send_replace(false);
            // A sentence may have arrived while the busy flag was dropping
            if inner.pending.lock().is_empty() {
                break 'runs;
            }
            if inner.busy_tx.send_replace(true) {
                break 'runs;
            }
        }
    }
}
