use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use narrator_core::audio::AudioSink;
use narrator_core::engine::{CommentatorConfig, LoopContext, LoopDiagnostics, NarrationLoop};
use narrator_core::events::{CancelToken, EventQueue, EventRecord, EventSink};
use narrator_core::signals::{CommentarySource, LoopState};
use narrator_core::{
    BackendHandle, LoopSignal, NarrationBackend, NarrationResponse, NarratorError,
    TerminationReason,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Backend that records every prompt and either fails or answers with a
/// numbered transcript plus one audio part.
struct ScriptedBackend {
    name: &'static str,
    fail: bool,
    delay: Duration,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl NarrationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn narrate(
        &mut self,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<(), NarratorError> {
        thread::sleep(self.delay);
        let call = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        if self.fail {
            return Err(NarratorError::backend(self.name, "scripted outage"));
        }
        on_response(NarrationResponse::audio(vec![7; 64]));
        on_response(NarrationResponse::transcript(format!("{} commentary {call}", self.name)));
        on_response(NarrationResponse::turn_complete());
        Ok(())
    }
}

fn backend(name: &'static str, fail: bool) -> (BackendHandle, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let handle = BackendHandle::new(ScriptedBackend {
        name,
        fail,
        delay: Duration::ZERO,
        prompts: Arc::clone(&prompts),
    });
    (handle, prompts)
}

#[derive(Default)]
struct CollectingSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl AudioSink for CollectingSink {
    fn add_chunk(&self, chunk: Vec<u8>) {
        self.chunks.lock().push(chunk);
    }
}

struct Harness {
    narration_loop: NarrationLoop,
    queue: Arc<EventQueue>,
    signals: broadcast::Receiver<LoopSignal>,
    diagnostics: Arc<LoopDiagnostics>,
    audio: Arc<CollectingSink>,
}

fn harness(
    config: CommentatorConfig,
    primary: BackendHandle,
    fallback: Option<BackendHandle>,
) -> Harness {
    let queue = Arc::new(EventQueue::new(config.queue_capacity).expect("queue"));
    let (signal_tx, signals) = broadcast::channel(256);
    let diagnostics = Arc::new(LoopDiagnostics::default());
    let audio = Arc::new(CollectingSink::default());
    let narration_loop = NarrationLoop::new(LoopContext {
        config,
        queue: Arc::clone(&queue),
        primary,
        fallback,
        audio: Arc::clone(&audio) as Arc<dyn AudioSink>,
        cancel: CancelToken::new(),
        signal_tx,
        diagnostics: Arc::clone(&diagnostics),
    })
    .expect("valid loop config");
    Harness {
        narration_loop,
        queue,
        signals,
        diagnostics,
        audio,
    }
}

fn config(timeout_ms: u64, max_timeouts: u32) -> CommentatorConfig {
    CommentatorConfig {
        dequeue_timeout: Duration::from_millis(timeout_ms),
        max_timeouts,
        ..CommentatorConfig::default()
    }
}

fn drain_signals(rx: &mut broadcast::Receiver<LoopSignal>) -> Vec<LoopSignal> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(signal) => out.push(signal),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
        }
    }
}

fn recv_signal_with_timeout(
    rx: &mut broadcast::Receiver<LoopSignal>,
    timeout: Duration,
) -> LoopSignal {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(signal) => return signal,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for loop signal");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("signal channel closed unexpectedly"),
        }
    }
}

#[test]
fn idle_loop_terminates_after_max_timeouts_with_one_fewer_heartbeat() {
    let max_timeouts = 5;
    let timeout = Duration::from_millis(30);
    let (primary, prompts) = backend("primary", false);
    let mut h = harness(config(30, max_timeouts), primary, None);

    let start = Instant::now();
    let reason = h.narration_loop.run();
    let elapsed = start.elapsed();

    assert_eq!(reason, TerminationReason::Inactivity);
    assert_eq!(h.narration_loop.state(), LoopState::Terminated);
    assert!(elapsed >= timeout * max_timeouts, "terminated early: {elapsed:?}");
    assert!(prompts.lock().is_empty());

    let signals = drain_signals(&mut h.signals);
    let heartbeats: Vec<_> = signals
        .iter()
        .filter_map(|s| match s {
            LoopSignal::Heartbeat { seq, state } => Some((*seq, *state)),
            _ => None,
        })
        .collect();
    assert_eq!(heartbeats.len(), (max_timeouts - 1) as usize);
    assert!(heartbeats.iter().all(|(_, state)| *state == LoopState::TimedOut));
    assert_eq!(
        heartbeats.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        signals.last(),
        Some(&LoopSignal::Terminated {
            reason: TerminationReason::Inactivity,
            events_processed: 0,
        })
    );

    let snap = h.diagnostics.snapshot();
    assert_eq!(snap.timeouts, max_timeouts as usize);
    assert_eq!(snap.heartbeats, (max_timeouts - 1) as usize);
}

#[test]
fn an_event_resets_the_consecutive_timeout_counter() {
    let max_timeouts = 3;
    let (primary, prompts) = backend("primary", false);
    let mut h = harness(config(40, max_timeouts), primary, None);
    let sink: Arc<dyn EventSink> = Arc::clone(&h.queue) as Arc<dyn EventSink>;

    // Two timeouts pass (~80 ms), then an event arrives before the third.
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        sink.publish(EventRecord::new("late-worker", "search"));
    });

    let reason = h.narration_loop.run();
    producer.join().expect("producer thread");

    assert_eq!(reason, TerminationReason::Inactivity);
    assert_eq!(h.narration_loop.events_processed(), 1);
    assert_eq!(prompts.lock().len(), 1);
    // 2 timeout heartbeats + 1 event heartbeat + (max - 1) after the reset.
    let snap = h.diagnostics.snapshot();
    assert_eq!(snap.heartbeats, 2 + 1 + (max_timeouts as usize - 1));
    assert_eq!(snap.timeouts, 2 + max_timeouts as usize);
}

#[test]
fn prompt_lists_window_events_in_arrival_order() {
    let (primary, prompts) = backend("primary", false);
    let mut h = harness(config(20, 2), primary, None);
    for i in 1..=5 {
        h.queue
            .enqueue(EventRecord::new("worker", format!("E{i}")))
            .expect("enqueue");
    }
    h.queue.close();

    assert_eq!(h.narration_loop.run(), TerminationReason::QueueClosed);

    let prompts = prompts.lock();
    assert_eq!(prompts.len(), 5);
    let last = &prompts[4];
    let positions: Vec<usize> = (1..=5)
        .map(|i| last.find(&format!("\"E{i}\"")).expect("event in prompt"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");

    let window = h.narration_loop.window();
    assert_eq!(window.len(), 5);
    assert!(window[4].contains("\"E5\""));
}

#[test]
fn failing_primary_activates_fallback_exactly_once_per_cycle() {
    let (primary, primary_prompts) = backend("primary", true);
    let (fallback, fallback_prompts) = backend("fallback", false);
    let mut h = harness(config(20, 2), primary, Some(fallback));
    for i in 0..3 {
        h.queue
            .enqueue(EventRecord::new("worker", format!("step-{i}")))
            .expect("enqueue");
    }
    h.queue.close();

    h.narration_loop.run();

    assert_eq!(primary_prompts.lock().len(), 3);
    assert_eq!(fallback_prompts.lock().len(), 3);
    assert_eq!(
        h.narration_loop.history(),
        vec![
            "fallback commentary 1".to_string(),
            "fallback commentary 2".to_string(),
            "fallback commentary 3".to_string(),
        ]
    );

    let commentary: Vec<_> = drain_signals(&mut h.signals)
        .into_iter()
        .filter_map(|s| match s {
            LoopSignal::Commentary(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(commentary.len(), 3);
    assert!(commentary.iter().all(|c| c.source == CommentarySource::Fallback));
    assert_eq!(commentary[2].event_number, 3);

    let snap = h.diagnostics.snapshot();
    assert_eq!(snap.fallback_activations, 3);
    assert_eq!(snap.fallback_successes, 3);
    assert_eq!(snap.total_failures, 0);
    assert_eq!(h.audio.chunks.lock().len(), 3);
}

#[test]
fn healthy_primary_never_touches_fallback() {
    let (primary, _) = backend("primary", false);
    let (fallback, fallback_prompts) = backend("fallback", false);
    let mut h = harness(config(20, 2), primary, Some(fallback));
    h.queue.enqueue(EventRecord::new("w", "a")).expect("enqueue");
    h.queue.close();

    h.narration_loop.run();

    assert!(fallback_prompts.lock().is_empty());
    assert_eq!(h.narration_loop.history(), vec!["primary commentary 1".to_string()]);
}

#[test]
fn total_failure_skips_the_cycle_and_keeps_consuming() {
    let (primary, _) = backend("primary", true);
    let (fallback, _) = backend("fallback", true);
    let mut h = harness(config(20, 2), primary, Some(fallback));
    let sink: Arc<dyn EventSink> = Arc::clone(&h.queue) as Arc<dyn EventSink>;
    sink.publish(EventRecord::new("w", "first"));
    sink.publish(EventRecord::new("w", "second"));

    let reason = h.narration_loop.run();

    assert_eq!(reason, TerminationReason::Inactivity);
    assert_eq!(h.narration_loop.events_processed(), 2);
    assert!(h.narration_loop.history().is_empty());
    assert_eq!(h.diagnostics.snapshot().total_failures, 2);
    assert!(h.audio.chunks.lock().is_empty());
}

#[test]
fn cancel_from_another_thread_wakes_a_waiting_loop() {
    let (primary, _) = backend("primary", false);
    let queue = Arc::new(EventQueue::new(8).expect("queue"));
    let (signal_tx, mut signals) = broadcast::channel(16);
    let cancel = CancelToken::new();
    let mut narration_loop = NarrationLoop::new(LoopContext {
        config: config(10_000, 5),
        queue,
        primary,
        fallback: None,
        audio: Arc::new(narrator_core::audio::DiscardAudio),
        cancel: cancel.clone(),
        signal_tx,
        diagnostics: Arc::new(LoopDiagnostics::default()),
    })
    .expect("loop");

    let start = Instant::now();
    let handle = thread::spawn(move || narration_loop.run());
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    let reason = handle.join().expect("loop thread panicked");
    assert_eq!(reason, TerminationReason::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        recv_signal_with_timeout(&mut signals, Duration::from_secs(1)),
        LoopSignal::Terminated {
            reason: TerminationReason::Cancelled,
            ..
        }
    ));
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    let (primary, _) = backend("primary", false);
    let config = CommentatorConfig {
        window_capacity: 200,
        snapshot_len: 200,
        ..config(50, 2)
    };
    let mut h = harness(config, primary, None);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let sink: Arc<dyn EventSink> = Arc::clone(&h.queue) as Arc<dyn EventSink>;
            thread::spawn(move || {
                for i in 0..25 {
                    sink.publish(EventRecord::new(format!("p{p}"), format!("{i}")));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }
    h.queue.close();
    h.narration_loop.run();

    let window = h.narration_loop.window();
    assert_eq!(window.len(), 100);
    for p in 0..4 {
        let tag = format!("\"sourceId\":\"p{p}\"");
        let actions: Vec<usize> = window
            .iter()
            .filter(|e| e.contains(&tag))
            .map(|e| {
                let v: serde_json::Value = serde_json::from_str(e).expect("json entry");
                v["action"].as_str().expect("action").parse().expect("number")
            })
            .collect();
        assert_eq!(actions, (0..25).collect::<Vec<_>>());
    }
}
