//! Capability traits for the native subsystems driven by the pipeline
//!
//! The core treats every native module (inference, transcription, speech
//! synthesis, file storage) as an opaque implementation of one of these
//! traits and never inspects its internal shape.

use crate::generation::GenerationParams;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpAssetStore;

/// Callback invoked once per generated token fragment.
///
/// Return `false` to request cooperative cancellation; the engine stops
/// producing tokens as soon as it observes the request.
pub type TokenCallback = Box<dyn FnMut(&str) -> bool + Send>;

/// Callback invoked once per partial transcription result.
pub type PartialCallback = Box<dyn FnMut(&str) + Send>;

/// Native text-generation capability.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Stream tokens for `prompt`, invoking `on_token` for each fragment
    /// in generation order.
    ///
    /// Resolves with the accumulated text once the engine reports
    /// completion, or as soon as a cancellation request (the callback
    /// returning `false`) has been honored.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: TokenCallback,
    ) -> Result<String>;
}

/// Constructs a [`GenerationEngine`] from a model file on disk.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn initialize(&self, model_path: &Path) -> Result<Arc<dyn GenerationEngine>>;
}

/// Native realtime transcription capability.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Begin a realtime capture; partial results flow into `on_partial`
    /// until the returned control handle is stopped.
    async fn start_realtime(&self, on_partial: PartialCallback) -> Result<Box<dyn CaptureControl>>;
}

/// Constructs a [`TranscriptionEngine`] from a model file on disk.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn initialize(&self, model_path: &Path) -> Result<Arc<dyn TranscriptionEngine>>;
}

/// Control handle for one realtime capture.
#[async_trait]
pub trait CaptureControl: Send {
    /// Stop capturing. Resolves only after the engine has delivered its
    /// final partial to the callback.
    async fn stop(&mut self) -> Result<()>;
}

/// How one utterance ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
}

/// Native speech-synthesis capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, resolving when the engine signals completion or
    /// cancellation. Cancellation is an outcome, not an error.
    async fn speak(&self, text: &str) -> Result<SpeakOutcome>;

    /// Cancel the in-flight utterance, if any.
    fn stop(&self);

    /// Observable mirroring the engine's own start/finish signal. May lag
    /// the queue's busy flag by the engine's internal latency.
    fn speaking(&self) -> watch::Receiver<bool>;
}

/// File-system capability for binary assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Fetch `url` into `path`, reporting `(bytes_written, total)` after
    /// each chunk. `total` is `None` when the server does not report a
    /// content length.
    async fn download(
        &self,
        url: &str,
        path: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<()>;

    fn delete(&self, path: &Path) -> Result<()>;
}
