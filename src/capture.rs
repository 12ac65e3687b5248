//! Realtime voice capture sessions
//!
//! One session per press of the capture control. Starting a session first
//! silences any ongoing speech playback so the microphone does not pick the
//! assistant's own voice back up. Partial transcripts overwrite each other;
//! only the latest one matters, and the final partial at stop time is the
//! utterance handed to generation.

use crate::engines::{CaptureControl, PartialCallback, TranscriptionEngine};
use crate::speech::SpeechQueue;
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct VoiceCaptureSession {
    id: Uuid,
    control: Option<Box<dyn CaptureControl>>,
    partials: mpsc::UnboundedReceiver<String>,
    latest: Arc<Mutex<String>>,
    stopped: Arc<AtomicBool>,
}

impl VoiceCaptureSession {
    /// Silence playback, then open a realtime capture on `engine`.
    pub async fn start(
        engine: Arc<dyn TranscriptionEngine>,
        speech: &SpeechQueue,
    ) -> Result<Self> {
        speech.drain_and_stop().await;

        let id = Uuid::new_v4();
        let (partial_tx, partials) = mpsc::unbounded_channel();
        let latest = Arc::new(Mutex::new(String::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let cb_latest = latest.clone();
        let cb_stopped = stopped.clone();
        let on_partial: PartialCallback = Box::new(move |text| {
            // The native engine may keep calling after stop; those partials
            // belong to a session that no longer exists
            if cb_stopped.load(Ordering::SeqCst) {
                debug!(session = %id, "discarding stale partial");
                return;
            }
            *cb_latest.lock() = text.to_string();
            let _ = partial_tx.send(text.to_string());
        });

        let control = engine.start_realtime(on_partial).await?;
        info!(session = %id, "voice capture started");

        Ok(Self {
            id,
            control: Some(control),
            partials,
            latest,
            stopped,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next partial transcript, `None` once the session has stopped and the
    /// buffered partials are consumed.
    pub async fn next_partial(&mut self) -> Option<String> {
        self.partials.recv().await
    }

    /// Stop capturing and return the final transcript. Idempotent; a second
    /// call returns the same transcript without touching the engine.
    ///
    /// The stale-partial guard is raised only after the engine acknowledges
    /// the stop, so the final partial delivered during shutdown still lands
    /// in the transcript.
    pub async fn stop(&mut self) -> Result<String> {
        if let Some(mut control) = self.control.take() {
            control.stop().await?;
            self.stopped.store(true, Ordering::SeqCst);
            self.partials.close();
            info!(session = %self.id, "voice capture stopped");
        }
        Ok(self.latest.lock().clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
