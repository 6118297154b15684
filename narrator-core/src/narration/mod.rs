//! Narration backend abstraction.
//!
//! The `NarrationBackend` trait decouples the narration loop from any
//! specific model client (stub tone generator, chat-completion HTTP API,
//! streaming live-audio model, etc.).
//!
//! `&mut self` on `narrate` expresses that clients are stateful (sessions,
//! connection pools, counters). All mutation is serialised through
//! `BackendHandle`'s `parking_lot::Mutex`.

pub mod live;
pub mod prompt;
pub mod response;
pub mod stub;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ChatCompletionBackend, ChatCompletionConfig};

#[cfg(feature = "live")]
pub use live::WebSocketTransport;
pub use live::{LiveModelBackend, LiveModelConfig, LiveTransport};
pub use prompt::{PromptBuilder, PromptContext, DEFAULT_STYLES};
pub use response::NarrationResponse;
pub use stub::StubNarrator;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract for narration backends.
pub trait NarrationBackend: Send + 'static {
    /// Short identifier used in logs and commentary signals.
    fn name(&self) -> &str;

    /// One-time setup (open sessions, validate credentials). Called once
    /// before the loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Narrate `prompt`, delivering each decoded response part to
    /// `on_response` as it arrives.
    ///
    /// Parts already delivered stay delivered even if the call later fails.
    ///
    /// # Errors
    /// Any failure of the underlying client. The loop treats every error the
    /// same way: try the fallback.
    fn narrate(
        &mut self,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<()>;
}

/// Thread-safe reference-counted handle to any `NarrationBackend` implementor.
#[derive(Clone)]
pub struct BackendHandle(pub Arc<Mutex<dyn NarrationBackend>>);

impl BackendHandle {
    /// Wrap any `NarrationBackend` in a `BackendHandle`.
    pub fn new<B: NarrationBackend>(backend: B) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }

    pub fn name(&self) -> String {
        self.0.lock().name().to_string()
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle").finish_non_exhaustive()
    }
}
