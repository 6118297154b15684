//! Frame splicing inside the real-time output callback.
//!
//! Each invocation turns at most one queued chunk into exactly one output
//! frame:
//!
//! ```text
//! ring empty          → frame of zeros
//! chunk == frame      → chunk as-is
//! chunk <  frame      → chunk + zero padding
//! chunk >  frame      → first frame's worth; remainder stays at ring front
//! ```
//!
//! Undersized chunks are never joined across invocations.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::buffering::AudioRingBuffer;

use super::engine::PlaybackDiagnostics;
use super::BYTES_PER_SAMPLE;

/// Whether the host should keep invoking the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Continue,
    /// The engine is shutting down.
    Stop,
}

/// Where the bytes of one frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    /// A chunk of exactly the frame size.
    Exact,
    /// An undersized chunk, zero padded.
    Padded,
    /// The head of an oversized chunk; its remainder is still queued.
    Split,
    /// Nothing queued: silence.
    Underrun,
    /// The producer held the ring lock: silence.
    Contended,
    /// An internal fault was caught: silence.
    Fault,
}

/// Callback-side half of the playback path.
#[derive(Clone)]
pub struct FrameSplicer {
    ring: Arc<AudioRingBuffer>,
    shutdown: Arc<AtomicBool>,
    diagnostics: Arc<PlaybackDiagnostics>,
}

impl FrameSplicer {
    pub fn new(
        ring: Arc<AudioRingBuffer>,
        shutdown: Arc<AtomicBool>,
        diagnostics: Arc<PlaybackDiagnostics>,
    ) -> Self {
        Self {
            ring,
            shutdown,
            diagnostics,
        }
    }

    /// Fill `out` completely. Never panics, never blocks.
    pub fn fill(&self, out: &mut [u8]) -> CallbackStatus {
        self.fill_with(out, |out| self.splice(out))
    }

    fn fill_with(
        &self,
        out: &mut [u8],
        body: impl FnOnce(&mut [u8]) -> FrameSource,
    ) -> CallbackStatus {
        let source = match catch_unwind(AssertUnwindSafe(|| body(out))) {
            Ok(source) => source,
            Err(_) => {
                out.fill(0);
                FrameSource::Fault
            }
        };
        self.diagnostics.record_frame(source);

        if self.shutdown.load(Ordering::Acquire) {
            CallbackStatus::Stop
        } else {
            CallbackStatus::Continue
        }
    }

    /// Allocating convenience around [`fill`](Self::fill) for non-real-time
    /// callers.
    pub fn render(&self, bytes_needed: usize) -> (Vec<u8>, CallbackStatus) {
        let mut frame = vec![0u8; bytes_needed];
        let status = self.fill(&mut frame);
        (frame, status)
    }

    fn splice(&self, out: &mut [u8]) -> FrameSource {
        let bytes_needed = out.len();
        let Some(mut ring) = self.ring.try_lock() else {
            out.fill(0);
            return FrameSource::Contended;
        };
        let Some(chunk) = ring.front() else {
            out.fill(0);
            return FrameSource::Underrun;
        };

        let len = chunk.len();
        let source = if len == bytes_needed {
            out.copy_from_slice(chunk);
            FrameSource::Exact
        } else if len < bytes_needed {
            out[..len].copy_from_slice(chunk);
            out[len..].fill(0);
            FrameSource::Padded
        } else {
            out.copy_from_slice(&chunk[..bytes_needed]);
            FrameSource::Split
        };
        ring.consume_front(len.min(bytes_needed));
        source
    }
}

/// Copy 16-bit LE PCM with `src_channels` into an `i16` device buffer with
/// `dst_channels`. Mono sources are duplicated to every device channel; a
/// device with fewer channels takes the leading source channels.
pub fn pcm16_to_i16(src: &[u8], src_channels: usize, dst: &mut [i16], dst_channels: usize) {
    map_pcm16(src, src_channels, dst, dst_channels, |s| s);
}

/// Same as [`pcm16_to_i16`] for `f32` device buffers, scaled to [-1.0, 1.0).
pub fn pcm16_to_f32(src: &[u8], src_channels: usize, dst: &mut [f32], dst_channels: usize) {
    map_pcm16(src, src_channels, dst, dst_channels, |s| s as f32 / 32768.0);
}

fn map_pcm16<T: Copy>(
    src: &[u8],
    src_channels: usize,
    dst: &mut [T],
    dst_channels: usize,
    convert: impl Fn(i16) -> T,
) {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let src_frame_bytes = src_channels * BYTES_PER_SAMPLE;

    for (frame_idx, dst_frame) in dst.chunks_mut(dst_channels).enumerate() {
        let base = frame_idx * src_frame_bytes;
        for (c, sample) in dst_frame.iter_mut().enumerate() {
            let offset = base + c.min(src_channels - 1) * BYTES_PER_SAMPLE;
            let value = match src.get(offset..offset + BYTES_PER_SAMPLE) {
                Some(b) => i16::from_le_bytes([b[0], b[1]]),
                None => 0,
            };
            *sample = convert(value);
        }
    }
}
