//! # narrator-core
//!
//! Live commentary engine: watches what a team of agents is doing and talks
//! about it.
//!
//! ## Architecture
//!
//! ```text
//! Workers ──EventSink::publish──► EventQueue ──dequeue(T)──► NarrationLoop(spawn_blocking)
//!                                                                 │
//!                                                     SlidingWindow + commentary history
//!                                                                 │
//!                                              NarrationBackend (primary → fallback)
//!                                                    │                       │
//!                                          AudioEngine::add_chunk   broadcast::Sender<LoopSignal>
//!                                                    │
//!                                   AudioRingBuffer ──try_lock──► FrameSplicer ──► output callback
//! ```
//!
//! The output callback never blocks, allocates or frees per invocation.
//! Played chunks are handed back to the producer, which releases them on
//! its next push.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod narration;
pub mod signals;

// Convenience re-exports for downstream crates
pub use audio::{AudioEngine, AudioEngineConfig, AudioFormat, AudioSink, OutputTarget};
pub use engine::{Commentator, CommentatorConfig};
pub use error::{NarratorError, Result};
pub use events::{EventRecord, EventSink};
pub use narration::{
    BackendHandle, LiveModelBackend, LiveModelConfig, NarrationBackend, NarrationResponse,
    StubNarrator,
};
pub use signals::{CommentaryEvent, LoopSignal, LoopState, TerminationReason};

#[cfg(feature = "http")]
pub use narration::{ChatCompletionBackend, ChatCompletionConfig};
#[cfg(feature = "live")]
pub use narration::WebSocketTransport;
