//! Mock engines shared by the unit tests
//!
//! Scripted variants resolve immediately; gated variants block on a channel
//! tick per step so tests can interleave cancellation deterministically.

use crate::engines::{
    AssetStore, CaptureControl, GenerationBackend, GenerationEngine, PartialCallback,
    SpeakOutcome, SpeechSynthesizer, TokenCallback, TranscriptionBackend, TranscriptionEngine,
};
use crate::generation::GenerationParams;
use crate::{PatterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// In-memory asset store with scripted download behavior.
pub(crate) struct MockStore {
    existing: Mutex<HashSet<PathBuf>>,
    payload: u64,
    chunk: u64,
    report_total: bool,
    fail_next: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            existing: Mutex::new(HashSet::new()),
            payload: 1000,
            chunk: 250,
            report_total: true,
            fail_next: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn with_payload(payload: u64, chunk: u64, report_total: bool) -> Arc<Self> {
        Arc::new(Self {
            existing: Mutex::new(HashSet::new()),
            payload,
            chunk,
            report_total,
            fail_next: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn set_existing(&self, path: impl Into<PathBuf>) {
        self.existing.lock().insert(path.into());
    }

    pub fn fail_next_downloads(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for MockStore {
    fn exists(&self, path: &Path) -> bool {
        self.existing.lock().contains(path)
    }

    async fn download(
        &self,
        _url: &str,
        path: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(PatterError::Provisioning(
                "simulated network failure".into(),
            ));
        }

        let total = self.report_total.then_some(self.payload);
        let mut written = 0;
        while written < self.payload {
            written = (written + self.chunk).min(self.payload);
            on_progress(written, total);
            tokio::task::yield_now().await;
        }

        self.existing.lock().insert(path.to_path_buf());
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.existing.lock().remove(path);
        Ok(())
    }
}

/// Generation engine that replays a fixed token script.
pub(crate) struct ScriptedEngine {
    tokens: Vec<String>,
    gate: Option<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>,
    fail_at_end: bool,
}

impl ScriptedEngine {
    pub fn new(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            gate: None,
            fail_at_end: false,
        })
    }

    /// Each token is released by one tick on the returned sender; dropping
    /// the sender ends the script early.
    pub fn gated(tokens: &[&str]) -> (Arc<Self>, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            gate: Some(tokio::sync::Mutex::new(rx)),
            fail_at_end: false,
        });
        (engine, tx)
    }

    pub fn failing(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            gate: None,
            fail_at_end: true,
        })
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
        mut on_token: TokenCallback,
    ) -> Result<String> {
        let mut accumulated = String::new();
        for token in &self.tokens {
            if let Some(gate) = &self.gate {
                if gate.lock().await.recv().await.is_none() {
                    break;
                }
            } else {
                tokio::task::yield_now().await;
            }
            accumulated.push_str(token);
            if !on_token(token) {
                return Ok(accumulated);
            }
        }
        if self.fail_at_end {
            return Err(PatterError::Generation("simulated inference failure".into()));
        }
        Ok(accumulated)
    }
}

pub(crate) struct MockGenerationBackend {
    engine: Arc<dyn GenerationEngine>,
    fail_next: AtomicUsize,
}

impl MockGenerationBackend {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            fail_next: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_inits(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn initialize(&self, _model_path: &Path) -> Result<Arc<dyn GenerationEngine>> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(PatterError::EngineInit("simulated construction failure".into()));
        }
        Ok(self.engine.clone())
    }
}

/// Synthesizer that records utterances; the gated variant holds each
/// utterance open until ticked or cancelled.
pub(crate) struct MockSynthesizer {
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    fail_on: Mutex<HashSet<String>>,
    gate: Option<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>,
    cancel_rx: watch::Receiver<u64>,
    cancel_tx: watch::Sender<u64>,
    speaking_tx: watch::Sender<bool>,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn gated() -> (Arc<Self>, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(Some(rx)), tx)
    }

    fn build(gate: Option<mpsc::UnboundedReceiver<()>>) -> Arc<Self> {
        let (cancel_tx, cancel_rx) = watch::channel(0u64);
        let (speaking_tx, _) = watch::channel(false);
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            fail_on: Mutex::new(HashSet::new()),
            gate: gate.map(tokio::sync::Mutex::new),
            cancel_rx,
            cancel_tx,
            speaking_tx,
        })
    }

    pub fn fail_on(&self, text: &str) {
        self.fail_on.lock().insert(text.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn speak(&self, text: &str) -> Result<SpeakOutcome> {
        if self.fail_on.lock().contains(text) {
            return Err(PatterError::Speech("simulated synthesis failure".into()));
        }
        self.started.lock().push(text.to_string());
        self.speaking_tx.send_replace(true);

        let outcome = if let Some(gate) = &self.gate {
            let mut cancel_rx = self.cancel_rx.clone();
            cancel_rx.borrow_and_update();
            let mut gate = gate.lock().await;
            tokio::select! {
                _ = gate.recv() => SpeakOutcome::Completed,
                _ = cancel_rx.changed() => SpeakOutcome::Cancelled,
            }
        } else {
            tokio::task::yield_now().await;
            SpeakOutcome::Completed
        };

        if outcome == SpeakOutcome::Completed {
            self.completed.lock().push(text.to_string());
        }
        self.speaking_tx.send_replace(false);
        Ok(outcome)
    }

    fn stop(&self) {
        self.cancel_tx.send_modify(|epoch| *epoch += 1);
    }

    fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }
}

/// Transcriber whose partials are pushed by the test at any time, including
/// after stop, to exercise stale-partial discarding.
pub(crate) struct MockTranscriber {
    callback: Mutex<Option<PartialCallback>>,
}

impl MockTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(None),
        })
    }

    pub fn emit(&self, text: &str) {
        if let Some(cb) = self.callback.lock().as_mut() {
            cb(text);
        }
    }
}

#[async_trait]
impl TranscriptionEngine for MockTranscriber {
    async fn start_realtime(&self, on_partial: PartialCallback) -> Result<Box<dyn CaptureControl>> {
        *self.callback.lock() = Some(on_partial);
        Ok(Box::new(MockCaptureControl))
    }
}

struct MockCaptureControl;

#[async_trait]
impl CaptureControl for MockCaptureControl {
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct MockTranscriptionBackend {
    engine: Arc<dyn TranscriptionEngine>,
}

impl MockTranscriptionBackend {
    pub fn new(engine: Arc<dyn TranscriptionEngine>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriptionBackend {
    async fn initialize(&self, _model_path: &Path) -> Result<Arc<dyn TranscriptionEngine>> {
        Ok(self.engine.clone())
    }
}
