//! Streaming generation sessions
//!
//! One [`GenerationStream`] wraps a single text-generation request: a
//! finite, non-restartable, push-driven token sequence terminated by
//! completion, cancellation, or failure. Every event carries the session id
//! so consumers can discard late callbacks from a session that has already
//! been cancelled and replaced.

use crate::engines::{GenerationEngine, TokenCallback};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    pub fn with_stop_sequences(mut self, stops: &[&str]) -> Self {
        self.stop_sequences = stops.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Events emitted by a generation session, in delivery order.
#[derive(Clone, Debug)]
pub enum TokenEvent {
    Token {
        session_id: Uuid,
        text: String,
    },
    Complete {
        session_id: Uuid,
        full_text: String,
        first_token_ms: u64,
        total_ms: u64,
    },
    Cancelled {
        session_id: Uuid,
    },
    Failed {
        session_id: Uuid,
        error: String,
    },
}

impl TokenEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            TokenEvent::Token { session_id, .. }
            | TokenEvent::Complete { session_id, .. }
            | TokenEvent::Cancelled { session_id }
            | TokenEvent::Failed { session_id, .. } => *session_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenEvent::Token { .. })
    }
}

/// Cancellation handle for one session.
///
/// `cancel` is idempotent and is a no-op after natural completion.
#[derive(Clone)]
pub struct CancelHandle {
    session_id: Uuid,
    cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Flag the session for cooperative cancellation without waiting for
    /// the engine to acknowledge it.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Request cooperative cancellation and wait for the session to reach
    /// its terminal event. The native engine may deliver further callbacks
    /// in the meantime; they are suppressed, not errors.
    pub async fn cancel(&self) {
        self.request_cancel();
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// A single in-flight generation request.
pub struct GenerationStream {
    session_id: Uuid,
    events: mpsc::UnboundedReceiver<TokenEvent>,
    handle: CancelHandle,
}

impl GenerationStream {
    /// Submit `prompt` and start streaming. At most one session may be live
    /// per engine; callers must `cancel().await` any previous session first.
    pub fn start(
        engine: Arc<dyn GenerationEngine>,
        prompt: String,
        params: GenerationParams,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);

        let cancel_flag = cancel.clone();
        let task_params = params.clone();
        tokio::spawn(async move {
            debug!(session = %session_id, "generation session started");
            let started = Instant::now();
            let first_token: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
            let accumulated = Arc::new(Mutex::new(String::new()));

            let cb_cancel = cancel_flag.clone();
            let cb_first = first_token.clone();
            let cb_acc = accumulated.clone();
            let cb_tx = event_tx.clone();
            let stops = task_params.stop_sequences.clone();
            let on_token: TokenCallback = Box::new(move |token| {
                if cb_cancel.load(Ordering::SeqCst) {
                    return false;
                }
                cb_first.lock().get_or_insert_with(Instant::now);
                let _ = cb_tx.send(TokenEvent::Token {
                    session_id,
                    text: token.to_string(),
                });
                let mut acc = cb_acc.lock();
                acc.push_str(token);
                // A stop sequence may span token boundaries, so matching
                // runs on the accumulated text rather than per token. The
                // downstream pipeline has already seen these tokens; only
                // the completion text is trimmed.
                if stops.iter().any(|s| !s.is_empty() && acc.contains(s.as_str())) {
                    return false;
                }
                true
            });

            let result = engine.generate(&prompt, &task_params, on_token).await;

            let event = if cancel_flag.load(Ordering::SeqCst) {
                debug!(session = %session_id, "generation cancelled");
                TokenEvent::Cancelled { session_id }
            } else {
                match result {
                    Ok(full_text) => {
                        let full_text =
                            trim_at_stop(&full_text, &task_params.stop_sequences);
                        let total_ms = started.elapsed().as_millis() as u64;
                        let first_token_ms = first_token
                            .lock()
                            .map(|t| t.duration_since(started).as_millis() as u64)
                            .unwrap_or(total_ms);
                        debug!(
                            session = %session_id,
                            chars = full_text.len(),
                            total_ms,
                            "generation complete"
                        );
                        TokenEvent::Complete {
                            session_id,
                            full_text,
                            first_token_ms,
                            total_ms,
                        }
                    }
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "generation failed");
                        TokenEvent::Failed {
                            session_id,
                            error: e.to_string(),
                        }
                    }
                }
            };
            let _ = event_tx.send(event);
            let _ = done_tx.send(true);
        });

        Self {
            session_id,
            events: event_rx,
            handle: CancelHandle {
                session_id,
                cancel,
                done: done_rx,
            },
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Next event, `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<TokenEvent> {
        match self.events.recv().await {
            Some(event) if event.is_terminal() => {
                self.events.close();
                Some(event)
            }
            other => other,
        }
    }
}

fn trim_at_stop(text: &str, stops: &[String]) -> String {
    let cut = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();
    match cut {
        Some(i) => text[..i].to_string(),
        None => text.to_string(),
    }
}
