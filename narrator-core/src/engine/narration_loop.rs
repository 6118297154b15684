//! Blocking narration loop.
//!
//! ## State machine (per iteration)
//!
//! ```text
//! Waiting ──dequeue(T)──► event    → GotEvent: timeouts = 0, window.push, narrate, heartbeat → Waiting
//!                      └► timeout  → TimedOut: timeouts += 1
//!                                      timeouts <  max → heartbeat → Waiting
//!                                      timeouts == max → Terminated(Inactivity)
//!                      └► closed   → Terminated(QueueClosed)
//!                      └► cancel   → Terminated(Cancelled)
//! ```
//!
//! `Terminated` is absorbing. The loop runs in `spawn_blocking` (or a plain
//! thread); it blocks only in `dequeue` and inside the backend call.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    audio::AudioSink,
    buffering::SlidingWindow,
    engine::CommentatorConfig,
    error::{NarratorError, Result},
    events::{CancelToken, Dequeued, EventQueue},
    narration::{BackendHandle, NarrationResponse, PromptBuilder, PromptContext},
    signals::{CommentaryEvent, CommentarySource, LoopSignal, LoopState, TerminationReason},
};

#[derive(Default)]
pub struct LoopDiagnostics {
    pub events: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub primary_successes: AtomicUsize,
    pub primary_failures: AtomicUsize,
    pub fallback_activations: AtomicUsize,
    pub fallback_successes: AtomicUsize,
    pub total_failures: AtomicUsize,
    pub audio_chunks_forwarded: AtomicUsize,
    pub commentaries: AtomicUsize,
}

impl LoopDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            events: self.events.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            primary_successes: self.primary_successes.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            fallback_activations: self.fallback_activations.load(Ordering::Relaxed),
            fallback_successes: self.fallback_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            audio_chunks_forwarded: self.audio_chunks_forwarded.load(Ordering::Relaxed),
            commentaries: self.commentaries.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicUsize; 10] {
        [
            &self.events,
            &self.timeouts,
            &self.heartbeats,
            &self.primary_successes,
            &self.primary_failures,
            &self.fallback_activations,
            &self.fallback_successes,
            &self.total_failures,
            &self.audio_chunks_forwarded,
            &self.commentaries,
        ]
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSnapshot {
    pub events: usize,
    pub timeouts: usize,
    pub heartbeats: usize,
    pub primary_successes: usize,
    pub primary_failures: usize,
    pub fallback_activations: usize,
    pub fallback_successes: usize,
    pub total_failures: usize,
    pub audio_chunks_forwarded: usize,
    pub commentaries: usize,
}

/// Everything the loop needs from its owner.
pub struct LoopContext {
    pub config: CommentatorConfig,
    pub queue: Arc<EventQueue>,
    pub primary: BackendHandle,
    pub fallback: Option<BackendHandle>,
    pub audio: Arc<dyn AudioSink>,
    pub cancel: CancelToken,
    pub signal_tx: broadcast::Sender<LoopSignal>,
    pub diagnostics: Arc<LoopDiagnostics>,
}

/// What one backend attempt produced.
struct CycleOutput {
    transcript: String,
    audio_chunks: usize,
}

pub struct NarrationLoop {
    ctx: LoopContext,
    prompt: PromptBuilder,
    window: SlidingWindow<String>,
    history: SlidingWindow<String>,
    state: LoopState,
    consecutive_timeouts: u32,
    event_count: u64,
    heartbeat_seq: u64,
    started_at: Instant,
    terminated: Option<TerminationReason>,
}

impl NarrationLoop {
    /// # Errors
    /// `NarratorError::InvalidConfig` if the config does not validate.
    pub fn new(ctx: LoopContext) -> Result<Self> {
        ctx.config.validate()?;
        let window = SlidingWindow::new(ctx.config.window_capacity)?;
        let history = SlidingWindow::new(ctx.config.history_capacity)?;
        let prompt = PromptBuilder::new(ctx.config.styles.clone());
        Ok(Self {
            ctx,
            prompt,
            window,
            history,
            state: LoopState::Waiting,
            consecutive_timeouts: 0,
            event_count: 0,
            heartbeat_seq: 0,
            started_at: Instant::now(),
            terminated: None,
        })
    }

    /// Run until a termination condition is met. Calling again after
    /// termination returns the same reason without touching the queue.
    pub fn run(&mut self) -> TerminationReason {
        if let Some(reason) = self.terminated {
            return reason;
        }
        info!(
            max_timeouts = self.ctx.config.max_timeouts,
            timeout_ms = self.ctx.config.dequeue_timeout.as_millis() as u64,
            primary = self.ctx.primary.name().as_str(),
            "narration loop started"
        );
        self.started_at = Instant::now();

        let reason = loop {
            if let Some(reason) = self.step() {
                break reason;
            }
        };
        self.terminate(reason);
        reason
    }

    /// One `Waiting → … → Waiting` transition, or the reason to stop.
    fn step(&mut self) -> Option<TerminationReason> {
        if self.ctx.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }

        self.state = LoopState::Waiting;
        match self
            .ctx
            .queue
            .dequeue_cancellable(self.ctx.config.dequeue_timeout, Some(&self.ctx.cancel))
        {
            Dequeued::Event(event) => {
                self.state = LoopState::GotEvent;
                self.consecutive_timeouts = 0;
                self.event_count += 1;
                LoopDiagnostics::bump(&self.ctx.diagnostics.events);

                let span = info_span!("narration_cycle", event = self.event_count);
                let _guard = span.enter();
                debug!(
                    source_id = event.source_id(),
                    action = event.action(),
                    "event admitted to window"
                );
                self.window.push(event.to_window_entry());
                self.narrate();
                self.heartbeat();
                None
            }
            Dequeued::TimedOut => {
                self.state = LoopState::TimedOut;
                self.consecutive_timeouts += 1;
                LoopDiagnostics::bump(&self.ctx.diagnostics.timeouts);
                debug!(
                    consecutive = self.consecutive_timeouts,
                    max = self.ctx.config.max_timeouts,
                    "queue wait timed out"
                );
                if self.consecutive_timeouts < self.ctx.config.max_timeouts {
                    self.heartbeat();
                    None
                } else {
                    Some(TerminationReason::Inactivity)
                }
            }
            Dequeued::Closed => Some(TerminationReason::QueueClosed),
            Dequeued::Cancelled => Some(TerminationReason::Cancelled),
        }
    }

    fn terminate(&mut self, reason: TerminationReason) {
        self.state = LoopState::Terminated;
        self.terminated = Some(reason);
        info!(
            ?reason,
            events_processed = self.event_count,
            elapsed_s = self.started_at.elapsed().as_secs_f64(),
            "narration loop terminated"
        );
        let _ = self.ctx.signal_tx.send(LoopSignal::Terminated {
            reason,
            events_processed: self.event_count,
        });
    }

    fn heartbeat(&mut self) {
        self.heartbeat_seq += 1;
        LoopDiagnostics::bump(&self.ctx.diagnostics.heartbeats);
        let _ = self.ctx.signal_tx.send(LoopSignal::Heartbeat {
            seq: self.heartbeat_seq,
            state: self.state,
        });
    }

    /// Build a prompt from the window and run primary, then fallback.
    /// Never fails: a total failure is logged and the cycle produces nothing.
    fn narrate(&mut self) {
        if self.window.is_empty() {
            debug!("window empty, skipping narration");
            return;
        }

        let events = self.window.snapshot_last(self.ctx.config.snapshot_len);
        let topics = self.history.snapshot_last(self.ctx.config.history_topics);
        let style = self.prompt.style_for(self.event_count).to_string();
        let prompt = self.prompt.build(&PromptContext {
            events: &events,
            recent_topics: &topics,
            event_number: self.event_count,
            session_elapsed: self.started_at.elapsed(),
        });

        let primary = self.ctx.primary.clone();
        let primary_err = match self.attempt(&primary, &prompt) {
            Ok(output) => {
                LoopDiagnostics::bump(&self.ctx.diagnostics.primary_successes);
                self.finish(output, CommentarySource::Primary, &primary, style);
                return;
            }
            Err(e) => e,
        };
        LoopDiagnostics::bump(&self.ctx.diagnostics.primary_failures);

        let Some(fallback) = self.ctx.fallback.clone() else {
            LoopDiagnostics::bump(&self.ctx.diagnostics.total_failures);
            error!(error = %primary_err, "narration failed and no fallback is configured");
            return;
        };
        warn!(error = %primary_err, "primary narration failed, using fallback");
        LoopDiagnostics::bump(&self.ctx.diagnostics.fallback_activations);

        match self.attempt(&fallback, &prompt) {
            Ok(output) => {
                LoopDiagnostics::bump(&self.ctx.diagnostics.fallback_successes);
                self.finish(output, CommentarySource::Fallback, &fallback, style);
            }
            Err(fallback_err) => {
                LoopDiagnostics::bump(&self.ctx.diagnostics.total_failures);
                let total = NarratorError::NarrationTotalFailure {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                };
                error!(error = %total, "narration cycle produced no output");
            }
        }
    }

    /// Run one backend, forwarding audio as it streams in and accumulating
    /// transcript fragments.
    fn attempt(&self, backend: &BackendHandle, prompt: &str) -> Result<CycleOutput> {
        let audio = &self.ctx.audio;
        let diagnostics = &self.ctx.diagnostics;
        let mut transcript = String::new();
        let mut audio_chunks = 0usize;

        let mut on_response = |response: NarrationResponse| {
            if let Some(bytes) = response.audio {
                audio_chunks += 1;
                LoopDiagnostics::bump(&diagnostics.audio_chunks_forwarded);
                audio.add_chunk(bytes);
            }
            if let Some(text) = response.transcript {
                transcript.push_str(&text);
            }
        };

        let mut guard = backend.0.lock();
        guard.narrate(prompt, &mut on_response)?;
        drop(guard);

        Ok(CycleOutput {
            transcript,
            audio_chunks,
        })
    }

    fn finish(
        &mut self,
        output: CycleOutput,
        source: CommentarySource,
        backend: &BackendHandle,
        style: String,
    ) {
        let text = output.transcript.trim();
        if text.is_empty() {
            debug!(audio_chunks = output.audio_chunks, "narration produced audio only");
            return;
        }

        let backend_name = backend.name();
        let text_preview: String = text.chars().take(80).collect();
        info!(
            ?source,
            backend = backend_name.as_str(),
            audio_chunks = output.audio_chunks,
            text_preview = %text_preview,
            "commentary produced"
        );
        self.history.push(text.to_string());
        LoopDiagnostics::bump(&self.ctx.diagnostics.commentaries);
        let _ = self.ctx.signal_tx.send(LoopSignal::Commentary(CommentaryEvent {
            event_number: self.event_count,
            style,
            text: text.to_string(),
            source,
            backend: backend_name,
            audio_chunks: output.audio_chunks,
            produced_at: Utc::now(),
        }));
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.terminated
    }

    pub fn events_processed(&self) -> u64 {
        self.event_count
    }

    /// Serialized events currently in the window, oldest first.
    pub fn window(&self) -> Vec<String> {
        self.window.iter().cloned().collect()
    }

    /// Commentary produced so far (bounded), oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }
}
