//! Patter: on-device conversational assistant pipeline
//!
//! Couples model provisioning, streaming token generation, sentence
//! segmentation, and incremental speech synthesis behind a single
//! command/event orchestrator. Native engines plug in through the
//! capability traits in [`engines`].

pub mod capture;
pub mod config;
pub mod engines;
pub mod generation;
pub mod lifecycle;
pub mod messages;
pub mod orchestrator;
pub mod provision;
pub mod segment;
pub mod speech;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PatterError {
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Engine init error: {0}")]
    EngineInit(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<std::io::Error> for PatterError {
    fn from(e: std::io::Error) -> Self {
        PatterError::Provisioning(e.to_string())
    }
}

impl PatterError {
    /// Check if this error is recoverable without tearing down the pipeline
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Blocking until the user retries provisioning/init
            PatterError::Provisioning(_) => false,
            PatterError::EngineInit(_) => false,
            // Surfaced inline for the affected message only
            PatterError::Generation(_) => true,
            // Recovered locally by the speech queue
            PatterError::Speech(_) => true,
            PatterError::Transcription(_) => true,
            PatterError::Config(_) => false,
            PatterError::Channel(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            PatterError::Provisioning(_) => {
                "Model download failed. Check your connection and retry.".to_string()
            }
            PatterError::EngineInit(_) => {
                "Failed to load AI model. Please retry.".to_string()
            }
            PatterError::Generation(_) => {
                "Response generation failed. Please try again.".to_string()
            }
            PatterError::Speech(_) => {
                "Text-to-speech failed. Response will be shown as text.".to_string()
            }
            PatterError::Transcription(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            PatterError::Config(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            PatterError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PatterError>;
