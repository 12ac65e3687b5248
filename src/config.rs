//! Assistant pipeline configuration

use crate::generation::GenerationParams;
use crate::provision::AssetSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub system_prompt: String,
    pub generation: GenerationParams,
    pub generation_model: AssetSpec,
    pub transcription_model: AssetSpec,
    /// Ceiling on native engine construction before the lifecycle reports
    /// failure.
    pub init_timeout: Duration,
    pub speech_enabled: bool,
    /// Capacity of the bounded UI event queue; overflow drops events.
    pub event_queue_size: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a concise voice assistant. Answer in short \
                            spoken sentences."
                .to_string(),
            generation: GenerationParams::default(),
            generation_model: AssetSpec::new(
                "generation-model",
                "https://huggingface.co/Qwen/Qwen2.5-1.5B-Instruct-GGUF/resolve/main/qwen2.5-1.5b-instruct-q4_k_m.gguf",
                "models/generation.gguf",
            ),
            transcription_model: AssetSpec::new(
                "transcription-model",
                "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin",
                "models/transcription.bin",
            ),
            init_timeout: Duration::from_secs(120),
            speech_enabled: true,
            event_queue_size: 256,
        }
    }
}

impl AssistantConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_generation(mut self, params: GenerationParams) -> Self {
        self.generation = params;
        self
    }

    pub fn with_generation_model(mut self, spec: AssetSpec) -> Self {
        self.generation_model = spec;
        self
    }

    pub fn with_transcription_model(mut self, spec: AssetSpec) -> Self {
        self.transcription_model = spec;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_speech_enabled(mut self, enabled: bool) -> Self {
        self.speech_enabled = enabled;
        self
    }
}
