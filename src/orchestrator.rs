//! Pipeline orchestrator
//!
//! Single event loop that owns the two engine lifecycles, the active
//! generation session, the active capture session, and the speech queue.
//! The host drives it with [`Command`]s over an unbounded channel and
//! polls [`Event`]s from a bounded queue; a full queue drops events rather
//! than blocking the loop.
//!
//! At most one generation session and one capture session are live at a
//! time. Sending a new message forcibly replaces the previous session and
//! every session event carries its session id, so anything from a replaced
//! session is discarded instead of corrupting the new one.

use crate::capture::VoiceCaptureSession;
use crate::config::AssistantConfig;
use crate::engines::{
    AssetStore, GenerationBackend, GenerationEngine, SpeechSynthesizer, TranscriptionBackend,
    TranscriptionEngine,
};
use crate::generation::{CancelHandle, GenerationStream, TokenEvent};
use crate::lifecycle::{EngineLifecycle, EngineState, InitFn};
use crate::messages::{ChatMessage, Transcript};
use crate::provision::AssetProvisioner;
use crate::segment::SentenceSegmenter;
use crate::speech::{SpeakerState, SpeechQueue};
use crate::{PatterError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Commands accepted by the pipeline.
#[derive(Clone, Debug)]
pub enum Command {
    /// Submit a user message, replacing any in-flight generation.
    SendText(String),
    /// Cancel the in-flight generation, if any. Never an error.
    StopGeneration,
    StartCapture,
    /// Stop capturing and feed the final transcript into generation.
    StopCapture,
    SetSpeechEnabled(bool),
    ClearHistory,
    /// Re-attempt startup of whichever engines are in a failed state.
    Retry,
    /// Tear everything down and walk both engines through startup again.
    Reset,
    Shutdown,
}

/// Events published to the host, polled without blocking.
#[derive(Clone, Debug)]
pub enum Event {
    GenerationEngineState(EngineState),
    TranscriptionEngineState(EngineState),
    GenerationStarted {
        session_id: Uuid,
    },
    Token {
        session_id: Uuid,
        text: String,
    },
    /// A completed sentence, already queued for speech.
    Sentence {
        session_id: Uuid,
        text: String,
    },
    GenerationComplete {
        session_id: Uuid,
        full_text: String,
        first_token_ms: u64,
        total_ms: u64,
    },
    GenerationCancelled {
        session_id: Uuid,
    },
    GenerationFailed {
        session_id: Uuid,
        error: String,
    },
    CaptureStarted {
        session_id: Uuid,
    },
    PartialTranscript {
        session_id: Uuid,
        text: String,
    },
    CaptureStopped {
        session_id: Uuid,
        transcript: String,
    },
    Error(String),
    Shutdown,
}

/// Cheap, cloneable host-side handle.
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    event_rx: crossbeam_channel::Receiver<Event>,
    transcript: Transcript,
    speech: SpeechQueue,
    gen_state: watch::Receiver<EngineState>,
    stt_state: watch::Receiver<EngineState>,
}

impl OrchestratorHandle {
    pub fn send_command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| PatterError::Channel("pipeline is not running".into()))
    }

    /// Non-blocking poll, intended to be called once per UI frame.
    pub fn try_recv_event(&self) -> Option<Event> {
        self.event_rx.try_recv().ok()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn speaker_state(&self) -> SpeakerState {
        self.speech.speaker_state()
    }

    pub fn generation_state(&self) -> EngineState {
        self.gen_state.borrow().clone()
    }

    pub fn transcription_state(&self) -> EngineState {
        self.stt_state.borrow().clone()
    }

    /// Wait until generation startup settles, in `Ready` or `Failed`.
    pub async fn wait_generation_ready(&self) -> EngineState {
        Self::wait_settled(self.gen_state.clone()).await
    }

    pub async fn wait_transcription_ready(&self) -> EngineState {
        Self::wait_settled(self.stt_state.clone()).await
    }

    async fn wait_settled(mut state: watch::Receiver<EngineState>) -> EngineState {
        match state.wait_for(|s| s.is_ready() || s.is_failed()).await {
            Ok(settled) => settled.clone(),
            Err(_) => EngineState::Failed("pipeline is not running".into()),
        }
    }
}

/// Assembles an [`Orchestrator`] from its native capabilities, defaulting
/// the configuration and the asset store.
pub struct OrchestratorBuilder {
    config: AssistantConfig,
    generation: Arc<dyn GenerationBackend>,
    transcription: Arc<dyn TranscriptionBackend>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn AssetStore>,
}

impl OrchestratorBuilder {
    pub fn new(
        generation: Arc<dyn GenerationBackend>,
        transcription: Arc<dyn TranscriptionBackend>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            config: AssistantConfig::default(),
            generation,
            transcription,
            synthesizer,
            store: Arc::new(crate::engines::HttpAssetStore::new()),
        }
    }

    pub fn with_config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> (Orchestrator, OrchestratorHandle) {
        Orchestrator::new(
            self.config,
            self.generation,
            self.transcription,
            self.synthesizer,
            self.store,
        )
    }
}

struct ActiveSession {
    session_id: Uuid,
    handle: CancelHandle,
    stream: GenerationStream,
}

struct Core {
    config: AssistantConfig,
    gen_lifecycle: Arc<EngineLifecycle<Arc<dyn GenerationEngine>>>,
    stt_lifecycle: Arc<EngineLifecycle<Arc<dyn TranscriptionEngine>>>,
    speech: SpeechQueue,
    transcript: Transcript,
    event_tx: crossbeam_channel::Sender<Event>,
}

pub struct Orchestrator {
    core: Core,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Orchestrator {
    pub fn new(
        config: AssistantConfig,
        generation: Arc<dyn GenerationBackend>,
        transcription: Arc<dyn TranscriptionBackend>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn AssetStore>,
    ) -> (Self, OrchestratorHandle) {
        let provisioner = AssetProvisioner::new(store);

        let gen_path = config.generation_model.local_path.clone();
        let gen_init: InitFn<Arc<dyn GenerationEngine>> = Box::new(move || {
            let backend = generation.clone();
            let path = gen_path.clone();
            Box::pin(async move { backend.initialize(&path).await })
        });
        let gen_lifecycle = Arc::new(EngineLifecycle::new(
            "generation",
            vec![config.generation_model.clone()],
            provisioner.clone(),
            gen_init,
            config.init_timeout,
        ));

        let stt_path = config.transcription_model.local_path.clone();
        let stt_init: InitFn<Arc<dyn TranscriptionEngine>> = Box::new(move || {
            let backend = transcription.clone();
            let path = stt_path.clone();
            Box::pin(async move { backend.initialize(&path).await })
        });
        let stt_lifecycle = Arc::new(EngineLifecycle::new(
            "transcription",
            vec![config.transcription_model.clone()],
            provisioner,
            stt_init,
            config.init_timeout,
        ));

        let speech = SpeechQueue::new(synthesizer, config.speech_enabled);
        let transcript = Transcript::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::bounded(config.event_queue_size);

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            transcript: transcript.clone(),
            speech: speech.clone(),
            gen_state: gen_lifecycle.watch_state(),
            stt_state: stt_lifecycle.watch_state(),
        };

        let orchestrator = Self {
            core: Core {
                config,
                gen_lifecycle,
                stt_lifecycle,
                speech,
                transcript,
                event_tx,
            },
            command_rx,
        };
        (orchestrator, handle)
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("pipeline starting");
        let gen = self.core.gen_lifecycle.clone();
        tokio::spawn(async move {
            let _ = gen.start().await;
        });
        let stt = self.core.stt_lifecycle.clone();
        tokio::spawn(async move {
            let _ = stt.start().await;
        });

        let mut gen_states = self.core.gen_lifecycle.watch_state();
        let mut stt_states = self.core.stt_lifecycle.watch_state();
        let mut active: Option<ActiveSession> = None;
        let mut capture: Option<VoiceCaptureSession> = None;
        let mut segmenter = SentenceSegmenter::new();

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => break,
                        Some(command) => {
                            self.core
                                .handle_command(command, &mut active, &mut capture, &mut segmenter)
                                .await;
                        }
                    }
                }
                event = next_token_event(&mut active) => {
                    self.core
                        .handle_token_event(event, &mut active, &mut segmenter)
                        .await;
                }
                text = next_partial(&mut capture) => {
                    if let Some(session) = capture.as_ref() {
                        self.core.emit(Event::PartialTranscript {
                            session_id: session.id(),
                            text,
                        });
                    }
                }
                changed = gen_states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.core
                        .emit(Event::GenerationEngineState(gen_states.borrow().clone()));
                }
                changed = stt_states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.core
                        .emit(Event::TranscriptionEngineState(stt_states.borrow().clone()));
                }
            }
        }

        if let Some(session) = active.take() {
            session.handle.cancel().await;
        }
        if let Some(mut session) = capture.take() {
            let _ = session.stop().await;
        }
        self.core.speech.drain_and_stop().await;
        self.core.emit(Event::Shutdown);
        info!("pipeline stopped");
    }
}

impl Core {
    async fn handle_command(
        &self,
        command: Command,
        active: &mut Option<ActiveSession>,
        capture: &mut Option<VoiceCaptureSession>,
        segmenter: &mut SentenceSegmenter,
    ) {
        match command {
            Command::SendText(text) => {
                // Typed input takes precedence over an open microphone
                if let Some(mut session) = capture.take() {
                    let _ = session.stop().await;
                }
                self.start_generation(text, active, segmenter).await;
            }
            Command::StopGeneration => {
                if let Some(session) = active.take() {
                    session.handle.cancel().await;
                    segmenter.reset();
                    self.speech.drain_and_stop().await;
                    self.emit(Event::GenerationCancelled {
                        session_id: session.session_id,
                    });
                }
            }
            Command::StartCapture => {
                if capture.is_some() {
                    warn!("capture already running, ignoring");
                    return;
                }
                if let Some(session) = active.take() {
                    session.handle.cancel().await;
                    segmenter.reset();
                }
                let Some(engine) = self.stt_lifecycle.engine() else {
                    self.emit(Event::Error(
                        PatterError::Transcription("engine not ready".into()).user_message(),
                    ));
                    return;
                };
                match VoiceCaptureSession::start(engine, &self.speech).await {
                    Ok(session) => {
                        self.emit(Event::CaptureStarted {
                            session_id: session.id(),
                        });
                        *capture = Some(session);
                    }
                    Err(e) => self.emit(Event::Error(e.user_message())),
                }
            }
            Command::StopCapture => {
                let Some(mut session) = capture.take() else {
                    return;
                };
                match session.stop().await {
                    Ok(text) => {
                        self.emit(Event::CaptureStopped {
                            session_id: session.id(),
                            transcript: text.clone(),
                        });
                        if text.trim().is_empty() {
                            debug!("empty capture, nothing to send");
                        } else {
                            self.start_generation(text, active, segmenter).await;
                        }
                    }
                    Err(e) => self.emit(Event::Error(e.user_message())),
                }
            }
            Command::SetSpeechEnabled(enabled) => {
                self.speech.set_enabled(enabled).await;
            }
            Command::ClearHistory => {
                self.transcript.clear();
            }
            Command::Retry => {
                let gen = self.gen_lifecycle.clone();
                if gen.state().is_failed() {
                    tokio::spawn(async move {
                        let _ = gen.retry().await;
                    });
                }
                let stt = self.stt_lifecycle.clone();
                if stt.state().is_failed() {
                    tokio::spawn(async move {
                        let _ = stt.retry().await;
                    });
                }
            }
            Command::Reset => {
                if let Some(session) = active.take() {
                    session.handle.cancel().await;
                }
                if let Some(mut session) = capture.take() {
                    let _ = session.stop().await;
                }
                self.speech.drain_and_stop().await;
                segmenter.reset();
                self.gen_lifecycle.reset();
                self.stt_lifecycle.reset();
                let gen = self.gen_lifecycle.clone();
                tokio::spawn(async move {
                    let _ = gen.start().await;
                });
                let stt = self.stt_lifecycle.clone();
                tokio::spawn(async move {
                    let _ = stt.start().await;
                });
            }
            // Consumed by the event loop before dispatch
            Command::Shutdown => {}
        }
    }

    /// Replace any in-flight session with a fresh one for `text`.
    async fn start_generation(
        &self,
        text: String,
        active: &mut Option<ActiveSession>,
        segmenter: &mut SentenceSegmenter,
    ) {
        if let Some(previous) = active.take() {
            debug!(session = %previous.session_id, "replacing in-flight generation");
            previous.handle.cancel().await;
        }
        self.speech.drain_and_stop().await;
        segmenter.reset();

        let Some(engine) = self.gen_lifecycle.engine() else {
            self.emit(Event::Error(
                PatterError::Generation("engine not ready".into()).user_message(),
            ));
            return;
        };

        self.transcript.add(ChatMessage::user(text));
        let prompt = self.transcript.render_prompt(&self.config.system_prompt);
        let stream = GenerationStream::start(engine, prompt, self.config.generation.clone());
        let session_id = stream.session_id();
        let handle = stream.handle();
        self.emit(Event::GenerationStarted { session_id });
        *active = Some(ActiveSession {
            session_id,
            handle,
            stream,
        });
    }

    async fn handle_token_event(
        &self,
        event: TokenEvent,
        active: &mut Option<ActiveSession>,
        segmenter: &mut SentenceSegmenter,
    ) {
        // Anything from a session that is no longer the active one is late
        // output from a forced cancellation; drop it
        if active.as_ref().map(|s| s.session_id) != Some(event.session_id()) {
            debug!(session = %event.session_id(), "discarding event from superseded session");
            return;
        }

        match event {
            TokenEvent::Token { session_id, text } => {
                self.emit(Event::Token {
                    session_id,
                    text: text.clone(),
                });
                if let Some(sentence) = segmenter.feed(&text) {
                    self.speech.enqueue(sentence.clone());
                    self.emit(Event::Sentence {
                        session_id,
                        text: sentence,
                    });
                }
            }
            TokenEvent::Complete {
                session_id,
                full_text,
                first_token_ms,
                total_ms,
            } => {
                if let Some(sentence) = segmenter.flush() {
                    self.speech.enqueue(sentence.clone());
                    self.emit(Event::Sentence {
                        session_id,
                        text: sentence,
                    });
                }
                let spoken = self.speech.speaker_state().enabled;
                self.transcript
                    .add(ChatMessage::assistant(full_text.clone()).with_spoken(spoken));
                self.emit(Event::GenerationComplete {
                    session_id,
                    full_text,
                    first_token_ms,
                    total_ms,
                });
                *active = None;
            }
            TokenEvent::Cancelled { session_id } => {
                segmenter.reset();
                self.speech.drain_and_stop().await;
                self.emit(Event::GenerationCancelled { session_id });
                *active = None;
            }
            TokenEvent::Failed { session_id, error } => {
                segmenter.reset();
                self.emit(Event::GenerationFailed { session_id, error });
                *active = None;
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Err(crossbeam_channel::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            warn!(?event, "event queue full, dropping event");
        }
    }
}

async fn next_token_event(active: &mut Option<ActiveSession>) -> TokenEvent {
    match active {
        Some(session) => match session.stream.next_event().await {
            Some(event) => event,
            None => futures::future::pending().await,
        },
        None => futures::future::pending().await,
    }
}

async fn next_partial(capture: &mut Option<VoiceCaptureSession>) -> String {
    match capture {
        Some(session) => match session.next_partial().await {
            Some(text) => text,
            None => futures::future::pending().await,
        },
        None => futures::future::pending().await,
    }
}
