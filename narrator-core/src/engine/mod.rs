//! `Commentator`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Commentator::new()
//!     └─► event_sink()    → Arc<dyn EventSink> handed to workers
//!     └─► start()         → backends warmed up, audio engine started, loop spawned
//!         └─► stop()      → loop cancelled, queue closed, audio engine stopped
//!         └─► join().await → termination reason once the loop has exited
//! ```
//!
//! The loop is one-shot: once it has terminated (inactivity, cancel or a
//! closed queue) it is never restarted, and a second `start()` is an error.
//! `stop()` is idempotent and safe before `start()`.
//!
//! ## Threading
//!
//! The narration loop blocks in `dequeue` and inside backend calls, so it
//! runs on `tokio::task::spawn_blocking`, keeping the async executor free for
//! the workers. The audio engine owns its own output thread.

pub mod narration_loop;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    audio::{AudioEngine, AudioSink, DiscardAudio},
    error::{NarratorError, Result},
    events::{CancelToken, EventQueue, EventSink, DEFAULT_QUEUE_CAPACITY},
    narration::{BackendHandle, DEFAULT_STYLES},
    signals::{LoopSignal, TerminationReason},
};

pub use narration_loop::{LoopContext, LoopDiagnostics, LoopSnapshot, NarrationLoop};

/// Broadcast channel capacity: 256 signals buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `Commentator` and its narration loop.
#[derive(Debug, Clone)]
pub struct CommentatorConfig {
    /// Serialized events kept in the sliding window. Default: 50.
    pub window_capacity: usize,
    /// Most recent window entries put into each prompt. Must not exceed
    /// `window_capacity`. Default: 50.
    pub snapshot_len: usize,
    /// Past commentaries kept. Default: 50.
    pub history_capacity: usize,
    /// Past commentaries listed in the prompt as topics to avoid. Default: 20.
    pub history_topics: usize,
    /// How long one `dequeue` waits. Default: 3 s.
    pub dequeue_timeout: Duration,
    /// Consecutive timeouts that end the loop. Default: 5.
    pub max_timeouts: u32,
    /// Event queue capacity. Default: 1024.
    pub queue_capacity: usize,
    /// Commentary styles, rotated one per event.
    pub styles: Vec<String>,
}

impl Default for CommentatorConfig {
    fn default() -> Self {
        Self {
            window_capacity: 50,
            snapshot_len: 50,
            history_capacity: 50,
            history_topics: 20,
            dequeue_timeout: Duration::from_secs(3),
            max_timeouts: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            styles: DEFAULT_STYLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommentatorConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(NarratorError::InvalidConfig(msg.to_string())) };
        if self.window_capacity == 0 {
            return invalid("window_capacity must be > 0");
        }
        if self.snapshot_len == 0 || self.snapshot_len > self.window_capacity {
            return invalid("snapshot_len must be in 1..=window_capacity");
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity must be > 0");
        }
        if self.dequeue_timeout.is_zero() {
            return invalid("dequeue_timeout must be > 0");
        }
        if self.max_timeouts == 0 {
            return invalid("max_timeouts must be > 0");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be > 0");
        }
        Ok(())
    }
}

/// The top-level commentary handle.
///
/// `Commentator` is `Send + Sync`; all fields use interior mutability.
pub struct Commentator {
    config: CommentatorConfig,
    queue: Arc<EventQueue>,
    primary: BackendHandle,
    fallback: Option<BackendHandle>,
    audio_sink: Arc<dyn AudioSink>,
    audio_engine: Option<Arc<AudioEngine>>,
    cancel: CancelToken,
    /// `true` from `start()` until the loop exits.
    running: Arc<AtomicBool>,
    started: AtomicBool,
    signal_tx: broadcast::Sender<LoopSignal>,
    diagnostics: Arc<LoopDiagnostics>,
    task: Mutex<Option<JoinHandle<TerminationReason>>>,
}

impl Commentator {
    /// Create the queue and wiring. Does not start narrating; hand out
    /// `event_sink()` to workers, then call `start()`.
    ///
    /// # Errors
    /// `NarratorError::InvalidConfig` if `config` does not validate.
    pub fn new(
        config: CommentatorConfig,
        primary: BackendHandle,
        fallback: Option<BackendHandle>,
    ) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(EventQueue::new(config.queue_capacity)?);
        let (signal_tx, _) = broadcast::channel(BROADCAST_CAP);
        Ok(Self {
            config,
            queue,
            primary,
            fallback,
            audio_sink: Arc::new(DiscardAudio),
            audio_engine: None,
            cancel: CancelToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            signal_tx,
            diagnostics: Arc::new(LoopDiagnostics::default()),
            task: Mutex::new(None),
        })
    }

    /// Play narration through `engine`; its lifecycle follows the
    /// commentator's. Also makes it the audio sink.
    pub fn with_audio_engine(mut self, engine: Arc<AudioEngine>) -> Self {
        self.audio_sink = Arc::clone(&engine) as Arc<dyn AudioSink>;
        self.audio_engine = Some(engine);
        self
    }

    /// Route narrated audio through `sink` (e.g. a recording tap in front of
    /// the engine). Call after `with_audio_engine` to keep both.
    pub fn with_audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = sink;
        self
    }

    /// Port for workers. Never blocks; overflow is logged and dropped.
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.queue) as Arc<dyn EventSink>
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Warm up backends, start the audio engine and spawn the loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `NarratorError::EngineLifecycle` if already started once. A failed
    ///   start does not count.
    /// - Primary backend warm-up errors.
    /// - Audio engine start errors (the loop is not spawned).
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NarratorError::EngineLifecycle(
                "narration loop already started; it is not restartable".into(),
            ));
        }

        let result = self.spawn_loop();
        if result.is_err() {
            // Nothing was spawned, so a later start() may try again.
            self.running.store(false, Ordering::SeqCst);
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    fn spawn_loop(&self) -> Result<()> {
        info!(primary = self.primary.name().as_str(), "warming up narration backends");
        self.primary.0.lock().warm_up()?;

        let mut fallback = self.fallback.clone();
        if let Some(handle) = &fallback {
            let warmed = handle.0.lock().warm_up();
            if let Err(e) = warmed {
                warn!(error = %e, "fallback backend warm-up failed, running without fallback");
                fallback = None;
            }
        }

        if let Some(engine) = &self.audio_engine {
            engine.start()?;
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let mut narration_loop = NarrationLoop::new(LoopContext {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            primary: self.primary.clone(),
            fallback,
            audio: Arc::clone(&self.audio_sink),
            cancel: self.cancel.clone(),
            signal_tx: self.signal_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        })?;
        let running = Arc::clone(&self.running);

        let handle = tokio::task::spawn_blocking(move || {
            let reason = narration_loop.run();
            running.store(false, Ordering::SeqCst);
            reason
        });
        *self.task.lock() = Some(handle);
        info!("commentator started");
        Ok(())
    }

    /// Cancel the loop, close the queue and stop the audio engine.
    /// Idempotent; safe before `start()`.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("commentator stop requested");
        }
        self.cancel.cancel();
        self.queue.close();
        if let Some(engine) = &self.audio_engine {
            engine.stop();
        }
    }

    /// Wait for the loop to exit. `None` if it was never started or has
    /// already been joined.
    pub async fn join(&self) -> Option<TerminationReason> {
        let handle = self.task.lock().take()?;
        match handle.await {
            Ok(reason) => Some(reason),
            Err(e) => {
                warn!(error = %e, "narration loop task failed");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to heartbeats, commentary and the final termination notice.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<LoopSignal> {
        self.signal_tx.subscribe()
    }

    /// Snapshot of loop counters for observability.
    pub fn diagnostics(&self) -> LoopSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn config(&self) -> &CommentatorConfig {
        &self.config
    }
}

impl std::fmt::Debug for Commentator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commentator")
            .field("running", &self.is_running())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
