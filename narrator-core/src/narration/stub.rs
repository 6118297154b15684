//! `StubNarrator`: placeholder backend that narrates without a model.
//!
//! Produces a short tone plus a deterministic transcript so the full
//! queue → loop → audio path can be exercised end-to-end offline.

use std::f32::consts::TAU;

use tracing::debug;

use crate::error::Result;
use crate::narration::{NarrationBackend, NarrationResponse};

/// Emits, per call:
/// 1. the tone as a few audio parts of uneven size (like a streaming model)
/// 2. a transcript `"[stub commentary #N, <prompt bytes> prompt bytes]"`
/// 3. turn complete
pub struct StubNarrator {
    name: String,
    sample_rate: u32,
    tone_ms: u32,
    utterance_count: u64,
}

impl StubNarrator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            name: "stub".into(),
            sample_rate,
            tone_ms: 250,
            utterance_count: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tone_ms(mut self, tone_ms: u32) -> Self {
        self.tone_ms = tone_ms;
        self
    }

    /// 16-bit LE mono sine, pitch stepping with each utterance.
    fn tone(&self) -> Vec<u8> {
        let samples = (self.sample_rate as u64 * self.tone_ms as u64 / 1000) as usize;
        let freq = 440.0 + 40.0 * (self.utterance_count % 8) as f32;
        let rate = self.sample_rate.max(1) as f32;
        (0..samples)
            .flat_map(|i| {
                let s = (TAU * freq * i as f32 / rate).sin() * 0.2;
                ((s * i16::MAX as f32) as i16).to_le_bytes()
            })
            .collect()
    }
}

impl Default for StubNarrator {
    fn default() -> Self {
        Self::new(24_000)
    }
}

impl NarrationBackend for StubNarrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn narrate(
        &mut self,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<()> {
        self.utterance_count += 1;
        let tone = self.tone();
        debug!(
            utterance = self.utterance_count,
            tone_bytes = tone.len(),
            "StubNarrator::narrate"
        );

        // Odd split points so the splicer sees short and oversized parts.
        let mut rest = tone.as_slice();
        for part_len in [1_000usize, 4_800, 333] {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at(part_len.min(rest.len()));
            on_response(NarrationResponse::audio(head.to_vec()));
            rest = tail;
        }
        if !rest.is_empty() {
            on_response(NarrationResponse::audio(rest.to_vec()));
        }

        on_response(NarrationResponse::transcript(format!(
            "[stub commentary #{}, {} prompt bytes]",
            self.utterance_count,
            prompt.len()
        )));
        on_response(NarrationResponse::turn_complete());
        Ok(())
    }
}
