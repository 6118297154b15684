//! Signals broadcast by the narration loop.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON (log lines, a websocket, a UI bus).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narration loop state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    /// Blocked in `dequeue`.
    Waiting,
    /// An event was admitted to the window and narrated.
    GotEvent,
    /// `dequeue` returned without an event.
    TimedOut,
    /// Absorbing: the loop has exited.
    Terminated,
}

/// Why the loop reached [`LoopState::Terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationReason {
    /// `max_timeouts` consecutive dequeue timeouts.
    Inactivity,
    /// The cancel token fired.
    Cancelled,
    /// The event queue was closed and drained.
    QueueClosed,
}

/// Which backend produced a commentary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentarySource {
    Primary,
    Fallback,
}

/// One finished piece of commentary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentaryEvent {
    /// Number of the event that triggered this commentary (1-based).
    pub event_number: u64,
    pub style: String,
    pub text: String,
    pub source: CommentarySource,
    /// Backend name, e.g. `"stub"` or `"chat:gpt-4o"`.
    pub backend: String,
    /// Audio chunks forwarded to the sink during this cycle.
    pub audio_chunks: usize,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LoopSignal {
    /// Liveness pulse, once per processed event and once per non-final
    /// timeout.
    #[serde(rename_all = "camelCase")]
    Heartbeat { seq: u64, state: LoopState },
    Commentary(CommentaryEvent),
    /// Final notice; nothing follows it.
    #[serde(rename_all = "camelCase")]
    Terminated {
        reason: TerminationReason,
        events_processed: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_serializes_tagged_with_camel_case_state() {
        let json = serde_json::to_value(LoopSignal::Heartbeat {
            seq: 4,
            state: LoopState::TimedOut,
        })
        .expect("serialize heartbeat");
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["state"], "timedOut");
    }

    #[test]
    fn terminated_serializes_reason_and_count() {
        let json = serde_json::to_value(LoopSignal::Terminated {
            reason: TerminationReason::QueueClosed,
            events_processed: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "terminated");
        assert_eq!(json["reason"], "queueClosed");
        assert_eq!(json["eventsProcessed"], 12);
    }

    #[test]
    fn commentary_round_trips_with_flattened_fields() {
        let event = CommentaryEvent {
            event_number: 3,
            style: "analyst".into(),
            text: "Shelter search narrowed to two sites.".into(),
            source: CommentarySource::Fallback,
            backend: "chat:gpt-4o".into(),
            audio_chunks: 0,
            produced_at: Utc::now(),
        };
        let json = serde_json::to_value(LoopSignal::Commentary(event.clone())).unwrap();
        assert_eq!(json["type"], "commentary");
        assert_eq!(json["eventNumber"], 3);
        assert_eq!(json["source"], "fallback");
        assert_eq!(json["audioChunks"], 0);

        let back: LoopSignal = serde_json::from_value(json).unwrap();
        assert_eq!(back, LoopSignal::Commentary(event));
    }

    #[test]
    fn loop_state_rejects_wrong_casing() {
        assert!(serde_json::from_str::<LoopState>(r#""GotEvent""#).is_err());
        assert_eq!(
            serde_json::from_str::<LoopState>(r#""gotEvent""#).unwrap(),
            LoopState::GotEvent
        );
    }
}
