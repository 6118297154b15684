//! Bounded multi-producer / single-consumer event queue.
//!
//! Producers are latency-sensitive callback contexts: `enqueue` is a
//! `try_send` and never blocks. A full queue drops the event and logs it.
//! The single consumer waits in `dequeue` for at most a fixed timeout and
//! gets `Dequeued::TimedOut` back instead of an error.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{record::EventRecord, EventSink};
use crate::error::{NarratorError, Result};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Outcome of a single `dequeue` wait.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Event(EventRecord),
    /// No event arrived within the timeout.
    TimedOut,
    /// The queue was closed and every admitted event has been handed out.
    Closed,
    /// The supplied cancel token fired while waiting.
    Cancelled,
}

/// One-way cancellation signal shared between a controller and a loop.
///
/// Cancelling drops an internal sender, which wakes any `select!` that is
/// waiting on the paired receiver.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                wake_tx: Mutex::new(Some(wake_tx)),
                wake_rx,
            }),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.wake_tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn waker(&self) -> &Receiver<()> {
        &self.inner.wake_rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Bounded FIFO of `EventRecord`s in admission order.
pub struct EventQueue {
    tx: Sender<EventRecord>,
    rx: Receiver<EventRecord>,
    /// Dropped on `close()` to wake a waiting consumer.
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl EventQueue {
    /// # Errors
    /// `NarratorError::InvalidConfig` when `capacity` is zero (a rendezvous
    /// channel would make every non-blocking enqueue fail).
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(NarratorError::InvalidConfig(
                "event queue capacity must be greater than 0".into(),
            ));
        }
        let (tx, rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(0);
        Ok(Self {
            tx,
            rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Admit an event without blocking.
    ///
    /// # Errors
    /// - `NarratorError::ProducerOverflow` when the queue is full.
    /// - `NarratorError::QueueClosed` after `close()`.
    ///
    /// Both are logged here; callers may ignore them.
    pub fn enqueue(&self, event: EventRecord) -> Result<()> {
        if self.is_closed() {
            debug!(
                source = event.source_id(),
                action = event.action(),
                "event queue closed, dropping event"
            );
            return Err(NarratorError::QueueClosed);
        }
        match self.tx.try_send(event) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    source = event.source_id(),
                    action = event.action(),
                    capacity = self.capacity,
                    dropped,
                    "event queue full, dropping event"
                );
                Err(NarratorError::ProducerOverflow {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(NarratorError::QueueClosed),
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        self.dequeue_cancellable(timeout, None)
    }

    /// Like `dequeue`, but also returns early with `Dequeued::Cancelled`
    /// when `cancel` fires.
    pub fn dequeue_cancellable(&self, timeout: Duration, cancel: Option<&CancelToken>) -> Dequeued {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Dequeued::Cancelled;
        }
        if let Ok(event) = self.rx.try_recv() {
            return Dequeued::Event(event);
        }
        if self.is_closed() {
            return Dequeued::Closed;
        }

        let never_rx = never();
        let cancel_rx = cancel.map(CancelToken::waker).unwrap_or(&never_rx);

        select! {
            recv(self.rx) -> msg => match msg {
                Ok(event) => Dequeued::Event(event),
                Err(_) => Dequeued::Closed,
            },
            recv(self.close_rx) -> _ => match self.rx.try_recv() {
                Ok(event) => Dequeued::Event(event),
                Err(_) => Dequeued::Closed,
            },
            recv(cancel_rx) -> _ => Dequeued::Cancelled,
            default(timeout) => Dequeued::TimedOut,
        }
    }

    /// Reject further events and wake a waiting consumer. Idempotent.
    ///
    /// Events admitted before the call are still handed out by `dequeue`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_tx.lock().take();
            debug!(pending = self.len(), "event queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events admitted since construction.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Total events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for EventQueue {
    fn publish(&self, event: EventRecord) {
        // Overflow and closed are already logged by `enqueue`.
        let _ = self.enqueue(event);
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn event(n: usize) -> EventRecord {
        EventRecord::new(format!("worker-{n}"), "tick").with_parameter("n", n)
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            EventQueue::new(0),
            Err(NarratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn dequeue_preserves_admission_order() {
        let queue = EventQueue::new(8).unwrap();
        for n in 0..5 {
            queue.enqueue(event(n)).unwrap();
        }
        for n in 0..5 {
            match queue.dequeue(Duration::from_millis(10)) {
                Dequeued::Event(e) => assert_eq!(e.source_id(), format!("worker-{n}")),
                other => panic!("expected event, got {other:?}"),
            }
        }
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let queue = EventQueue::new(2).unwrap();
        queue.enqueue(event(0)).unwrap();
        queue.enqueue(event(1)).unwrap();

        let started = Instant::now();
        let err = queue.enqueue(event(2)).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(matches!(err, NarratorError::ProducerOverflow { capacity: 2 }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.accepted(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let queue = EventQueue::new(4).unwrap();
        let started = Instant::now();
        assert_eq!(queue.dequeue(Duration::from_millis(30)), Dequeued::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn close_wakes_consumer_and_drains_pending_events() {
        let queue = Arc::new(EventQueue::new(4).unwrap());
        queue.enqueue(event(7)).unwrap();
        queue.close();

        assert!(matches!(queue.enqueue(event(8)), Err(NarratorError::QueueClosed)));
        assert!(matches!(
            queue.dequeue(Duration::from_secs(1)),
            Dequeued::Event(e) if e.source_id() == "worker-7"
        ));

        let started = Instant::now();
        assert_eq!(queue.dequeue(Duration::from_secs(5)), Dequeued::Closed);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn close_from_another_thread_interrupts_wait() {
        let queue = Arc::new(EventQueue::new(4).unwrap());
        let closer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        let started = Instant::now();
        assert_eq!(queue.dequeue(Duration::from_secs(5)), Dequeued::Closed);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn cancel_token_interrupts_wait() {
        let queue = EventQueue::new(4).unwrap();
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
            remote.cancel();
        });

        let started = Instant::now();
        assert_eq!(
            queue.dequeue_cancellable(Duration::from_secs(5), Some(&token)),
            Dequeued::Cancelled
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(EventQueue::new(16).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..20 {
                        q.publish(event(w * 100 + n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(queue.len(), 16);
        assert_eq!(queue.accepted() + queue.dropped(), 80);
    }
}
