//! `AudioEngine`: playback lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! AudioEngine::new()
//!     └─► start()   → output thread spawned, device open confirmed, state = Running
//!         └─► stop() → shutdown flagged, output thread joined, state = Stopped
//! ```
//!
//! `start()` on a running engine and `stop()` on a stopped (or never
//! started) engine are no-ops. Both may be called from any thread while the
//! callback is active; a mutex serialises the two transitions and an atomic
//! state flag publishes the result.

use std::sync::{
    atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    mpsc, Arc,
};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    output::{run_output_thread, OpenedOutput},
    splicer::FrameSource,
    AudioEngineConfig, AudioSink, FrameSplicer,
};
use crate::buffering::{AudioRingBuffer, PushOutcome};
use crate::error::{NarratorError, Result};

/// Published lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

#[derive(Default)]
pub struct PlaybackDiagnostics {
    pub chunks_added: AtomicUsize,
    pub overflow_evictions: AtomicUsize,
    pub frames_rendered: AtomicUsize,
    pub exact: AtomicUsize,
    pub padded: AtomicUsize,
    pub splits: AtomicUsize,
    pub underruns: AtomicUsize,
    pub contended: AtomicUsize,
    pub faults: AtomicUsize,
}

impl PlaybackDiagnostics {
    pub(crate) fn record_frame(&self, source: FrameSource) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        let counter = match source {
            FrameSource::Exact => &self.exact,
            FrameSource::Padded => &self.padded,
            FrameSource::Split => &self.splits,
            FrameSource::Underrun => &self.underruns,
            FrameSource::Contended => &self.contended,
            FrameSource::Fault => &self.faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            chunks_added: self.chunks_added.load(Ordering::Relaxed),
            overflow_evictions: self.overflow_evictions.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            exact: self.exact.load(Ordering::Relaxed),
            padded: self.padded.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub chunks_added: usize,
    pub overflow_evictions: usize,
    pub frames_rendered: usize,
    pub exact: usize,
    pub padded: usize,
    pub splits: usize,
    pub underruns: usize,
    pub contended: usize,
    pub faults: usize,
}

struct OutputWorker {
    /// Dropping this disconnects the output thread's stop channel.
    stop_tx: crossbeam_channel::Sender<()>,
    handle: JoinHandle<()>,
    opened: OpenedOutput,
}

/// Playback engine: ring buffer + splicer + output stream.
///
/// `AudioEngine` is `Send + Sync`; share it as `Arc<AudioEngine>` between the
/// narration producer and whoever owns shutdown.
pub struct AudioEngine {
    config: AudioEngineConfig,
    ring: Arc<AudioRingBuffer>,
    state: Arc<AtomicU8>,
    shutdown: Arc<AtomicBool>,
    diagnostics: Arc<PlaybackDiagnostics>,
    worker: Mutex<Option<OutputWorker>>,
}

impl AudioEngine {
    /// # Errors
    /// `NarratorError::InvalidConfig` for zero-sized format fields or ring.
    pub fn new(config: AudioEngineConfig) -> Result<Self> {
        config.validate()?;
        let ring = Arc::new(AudioRingBuffer::new(config.ring_capacity)?);
        Ok(Self {
            config,
            ring,
            state: Arc::new(AtomicU8::new(EngineState::Stopped as u8)),
            shutdown: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(PlaybackDiagnostics::default()),
            worker: Mutex::new(None),
        })
    }

    /// Queue a chunk for playback without blocking. At capacity the oldest
    /// queued chunk is dropped.
    pub fn add_chunk(&self, chunk: Vec<u8>) {
        let len = chunk.len();
        self.diagnostics.chunks_added.fetch_add(1, Ordering::Relaxed);
        if let PushOutcome::EvictedOldest { evicted_len } = self.ring.push(chunk) {
            self.diagnostics
                .overflow_evictions
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                evicted_len,
                admitted_len = len,
                capacity = self.ring.capacity(),
                "audio ring full, evicted oldest chunk"
            );
        }
    }

    /// Open the output and start invoking the callback.
    ///
    /// Blocks until the output thread confirms the device is open (or not).
    ///
    /// # Errors
    /// - `NarratorError::NoDefaultOutputDevice` / `AudioDevice` / `AudioStream`
    ///   when the device cannot be opened.
    /// - `NarratorError::EngineLifecycle` if the output thread cannot be
    ///   spawned or dies before reporting.
    ///
    /// On error the engine stays `Stopped`.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("audio engine already running");
            return Ok(());
        }

        self.shutdown.store(false, Ordering::Release);
        self.set_state(EngineState::Starting);

        let splicer = FrameSplicer::new(
            Arc::clone(&self.ring),
            Arc::clone(&self.shutdown),
            Arc::clone(&self.diagnostics),
        );
        let target = self.config.output.clone();
        let format = self.config.format;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<OpenedOutput>>();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let spawned = std::thread::Builder::new()
            .name("narrator-audio-out".into())
            .spawn(move || run_output_thread(target, format, splicer, ready_tx, stop_rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(EngineState::Stopped);
                return Err(NarratorError::EngineLifecycle(format!(
                    "failed to spawn output thread: {e}"
                )));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(opened)) => {
                info!(
                    device = opened.device.as_str(),
                    sample_rate = opened.sample_rate,
                    channels = opened.channels,
                    "audio engine started"
                );
                *worker = Some(OutputWorker {
                    stop_tx,
                    handle,
                    opened,
                });
                self.set_state(EngineState::Running);
                Ok(())
            }
            Ok(Err(e)) => {
                drop(stop_tx);
                let _ = handle.join();
                self.set_state(EngineState::Stopped);
                warn!(error = %e, "audio engine failed to start");
                Err(e)
            }
            Err(_) => {
                // Thread exited without reporting, so it panicked.
                drop(stop_tx);
                let _ = handle.join();
                self.set_state(EngineState::Stopped);
                Err(NarratorError::EngineLifecycle(
                    "output thread died before opening the device".into(),
                ))
            }
        }
    }

    /// Halt the stream and release the device. Idempotent; safe before
    /// `start()` and from any thread.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        let Some(OutputWorker {
            stop_tx, handle, ..
        }) = worker.take()
        else {
            return;
        };

        self.set_state(EngineState::Stopping);
        self.shutdown.store(true, Ordering::Release);
        drop(stop_tx);
        if handle.join().is_err() {
            warn!("output thread panicked during shutdown");
        }
        self.set_state(EngineState::Stopped);
        info!("audio engine stopped");
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Device actually opened by the running engine.
    pub fn opened_output(&self) -> Option<OpenedOutput> {
        self.worker.lock().as_ref().map(|w| w.opened.clone())
    }

    pub fn config(&self) -> &AudioEngineConfig {
        &self.config
    }

    /// Chunks waiting to be played.
    pub fn queued_chunks(&self) -> usize {
        self.ring.len()
    }

    /// Drop everything queued (e.g. when narration is interrupted).
    pub fn clear(&self) {
        self.ring.clear();
    }

    pub fn diagnostics(&self) -> PlaybackSnapshot {
        self.diagnostics.snapshot()
    }

    /// Splicer bound to this engine's ring, for hosts that drive their own
    /// output callback.
    pub fn splicer(&self) -> FrameSplicer {
        FrameSplicer::new(
            Arc::clone(&self.ring),
            Arc::clone(&self.shutdown),
            Arc::clone(&self.diagnostics),
        )
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl AudioSink for AudioEngine {
    fn add_chunk(&self, chunk: Vec<u8>) {
        AudioEngine::add_chunk(self, chunk);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("state", &self.state())
            .field("queued_chunks", &self.queued_chunks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, OutputTarget};
    use std::time::{Duration, Instant};

    fn null_engine(ring_capacity: usize) -> AudioEngine {
        AudioEngine::new(AudioEngineConfig {
            format: AudioFormat {
                sample_rate: 24_000,
                channels: 1,
                frames_per_buffer: 240, // 10 ms
            },
            ring_capacity,
            output: OutputTarget::Null,
        })
        .expect("valid config")
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let engine = null_engine(4);
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn stop_twice_after_start_leaves_engine_stopped() {
        let engine = null_engine(4);
        engine.start().expect("null output always opens");
        assert!(engine.is_running());
        assert_eq!(engine.opened_output().map(|o| o.device), Some("null".into()));

        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.opened_output().is_none());
    }

    #[test]
    fn start_is_idempotent_and_restartable() {
        let engine = null_engine(4);
        engine.start().unwrap();
        engine.start().unwrap();
        engine.stop();
        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
    }

    #[test]
    fn running_engine_drains_queued_chunks() {
        let engine = null_engine(8);
        engine.add_chunk(vec![1; 480]);
        engine.add_chunk(vec![2; 100]);
        engine.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || engine.queued_chunks() == 0));
        engine.stop();

        let snap = engine.diagnostics();
        assert_eq!(snap.chunks_added, 2);
        assert!(snap.exact >= 1);
        assert!(snap.padded >= 1);
        assert_eq!(snap.faults, 0);
    }

    #[test]
    fn add_chunk_evicts_oldest_at_capacity() {
        let engine = null_engine(2);
        engine.add_chunk(vec![1]);
        engine.add_chunk(vec![2]);
        engine.add_chunk(vec![3]);
        assert_eq!(engine.queued_chunks(), 2);
        assert_eq!(engine.diagnostics().overflow_evictions, 1);
    }

    #[test]
    fn stop_from_another_thread_while_callback_runs() {
        let engine = Arc::new(null_engine(4));
        engine.start().unwrap();
        let remote = Arc::clone(&engine);
        std::thread::spawn(move || remote.stop())
            .join()
            .expect("stop thread");
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
