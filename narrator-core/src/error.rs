use thiserror::Error;

/// All errors produced by narrator-core.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("event queue is full ({capacity} events), event dropped")]
    ProducerOverflow { capacity: usize },

    #[error("event queue is closed")]
    QueueClosed,

    #[error("narration backend '{backend}' failed: {message}")]
    NarrationBackend { backend: String, message: String },

    #[error("narration failed on both backends (primary: {primary}; fallback: {fallback})")]
    NarrationTotalFailure { primary: String, fallback: String },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("audio engine lifecycle error: {0}")]
    EngineLifecycle(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NarratorError {
    /// Shorthand for a backend failure tagged with the backend name.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NarrationBackend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NarratorError>;
