//! Real-time playback of narrated audio.
//!
//! # Design constraints
//!
//! The output callback runs on an OS audio thread at elevated priority. It
//! **must not**:
//! - Block on a lock held by the producer
//! - Allocate per invocation (the scratch buffer only grows if the host asks
//!   for a larger buffer than ever before)
//! - Panic or return early without writing a full frame
//!
//! The producer side ([`AudioEngine::add_chunk`]) appends to a bounded
//! [`AudioRingBuffer`](crate::buffering::AudioRingBuffer); the callback side
//! ([`splicer::FrameSplicer`]) drains it with `try_lock`.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The engine therefore opens, owns and drops the stream on one
//! dedicated output thread; `start()` waits for that thread to report whether
//! the device opened.

pub mod device;
pub mod engine;
pub mod output;
pub mod splicer;

pub use engine::{AudioEngine, EngineState, PlaybackDiagnostics, PlaybackSnapshot};
pub use splicer::{CallbackStatus, FrameSource, FrameSplicer};

use crate::error::{NarratorError, Result};

/// Bytes per sample of the 16-bit signed little-endian PCM the engine plays.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Fixed PCM format of the chunks fed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Default: 24000 Hz.
    pub sample_rate: u32,
    /// Interleaved channels in each chunk. Default: 1.
    pub channels: u16,
    /// Frames requested per callback when the host lets us choose.
    /// Default: 1024.
    pub frames_per_buffer: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            frames_per_buffer: 1024,
        }
    }
}

impl AudioFormat {
    /// Bytes the callback must produce for `frame_count` frames.
    pub fn bytes_for_frames(&self, frame_count: usize) -> usize {
        frame_count * self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(NarratorError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.channels == 0 {
            return Err(NarratorError::InvalidConfig("channels must be > 0".into()));
        }
        if self.frames_per_buffer == 0 {
            return Err(NarratorError::InvalidConfig(
                "frames_per_buffer must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Where the engine sends rendered frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputTarget {
    /// System default output device.
    #[default]
    Default,
    /// Output device by name; falls back to the default device if missing.
    Named(String),
    /// No hardware: a software clock drives the callback at the buffer
    /// cadence. Used on headless hosts and in tests.
    Null,
}

/// Configuration for [`AudioEngine`].
#[derive(Debug, Clone)]
pub struct AudioEngineConfig {
    pub format: AudioFormat,
    /// Maximum queued chunks before the oldest is evicted. Default: 100.
    pub ring_capacity: usize,
    pub output: OutputTarget,
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            ring_capacity: crate::buffering::ring::DEFAULT_RING_CAPACITY,
            output: OutputTarget::Default,
        }
    }
}

impl AudioEngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.format.validate()?;
        if self.ring_capacity == 0 {
            return Err(NarratorError::InvalidConfig(
                "ring_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Port for anything that produces playable audio.
pub trait AudioSink: Send + Sync {
    /// Queue a chunk of PCM bytes. Must not block.
    fn add_chunk(&self, chunk: Vec<u8>);
}

impl<S: AudioSink + ?Sized> AudioSink for std::sync::Arc<S> {
    fn add_chunk(&self, chunk: Vec<u8>) {
        (**self).add_chunk(chunk);
    }
}

/// Sink that drops every chunk (text-only narration hosts).
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardAudio;

impl AudioSink for DiscardAudio {
    fn add_chunk(&self, _chunk: Vec<u8>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_matches_live_model_output() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 24_000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bytes_for_frames(512), 1024);
    }

    #[test]
    fn validate_rejects_zero_fields() {
        let mut config = AudioEngineConfig::default();
        assert!(config.validate().is_ok());
        config.ring_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AudioEngineConfig::default();
        config.format.sample_rate = 0;
        assert!(config.validate().is_err());
    }
}
