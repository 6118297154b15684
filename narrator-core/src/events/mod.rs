//! Inbound side of the pipeline: event records and the queue that carries
//! them from many workers to the single narration loop.

pub mod queue;
pub mod record;

use std::sync::Arc;

pub use queue::{CancelToken, Dequeued, EventQueue, DEFAULT_QUEUE_CAPACITY};
pub use record::{EventKind, EventRecord};

/// Port held by workers to report what they are doing.
///
/// `publish` must never block and never fail visibly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EventRecord);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn publish(&self, event: EventRecord) {
        (**self).publish(event);
    }
}
