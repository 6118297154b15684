//! WAV tap: records every narrated chunk before it reaches the speakers.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use narrator_core::AudioSink;
use parking_lot::Mutex;
use tracing::{info, warn};

struct TapState {
    writer: Option<WavWriter<BufWriter<File>>>,
    /// Low byte of a sample split across two chunks.
    pending: Option<u8>,
    samples_written: u64,
}

/// `AudioSink` decorator writing 16-bit mono PCM to a WAV file, then
/// forwarding each chunk unchanged to `inner`.
pub struct WavTap {
    inner: Arc<dyn AudioSink>,
    state: Mutex<TapState>,
}

impl WavTap {
    pub fn create(path: &Path, sample_rate: u32, inner: Arc<dyn AudioSink>) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create WAV file {}", path.display()))?;
        info!(path = %path.display(), sample_rate, "recording narration");
        Ok(Self {
            inner,
            state: Mutex::new(TapState {
                writer: Some(writer),
                pending: None,
                samples_written: 0,
            }),
        })
    }

    /// Flush and close the file. Later chunks are still forwarded but no
    /// longer recorded. Returns the number of samples written.
    pub fn finalize(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let samples = state.samples_written;
        if let Some(writer) = state.writer.take() {
            writer.finalize().context("failed to finalize WAV file")?;
            info!(samples, "recording finalized");
        }
        Ok(samples)
    }

    fn record(state: &mut TapState, chunk: &[u8]) -> std::result::Result<(), hound::Error> {
        let Some(writer) = state.writer.as_mut() else {
            return Ok(());
        };
        let mut bytes = chunk;
        if let Some(lo) = state.pending.take() {
            let Some((&hi, rest)) = bytes.split_first() else {
                state.pending = Some(lo);
                return Ok(());
            };
            writer.write_sample(i16::from_le_bytes([lo, hi]))?;
            state.samples_written += 1;
            bytes = rest;
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            state.samples_written += 1;
        }
        state.pending = pairs.remainder().first().copied();
        Ok(())
    }
}

impl AudioSink for WavTap {
    fn add_chunk(&self, chunk: Vec<u8>) {
        {
            let mut state = self.state.lock();
            if let Err(e) = Self::record(&mut state, &chunk) {
                warn!(error = %e, "WAV write failed, recording stopped");
                state.writer = None;
            }
        }
        self.inner.add_chunk(chunk);
    }
}
