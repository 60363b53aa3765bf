//! Delivery counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct FeedStats {
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    invalid_events: AtomicU64,
    events_dispatched: AtomicU64,
    deliveries: AtomicU64,
    subscriber_failures: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    connections_opened: AtomicU64,
}

macro_rules! counter {
    ($($record:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl FeedStats {
    counter! {
        record_frame => frames_received,
        record_malformed => malformed_frames,
        record_invalid => invalid_events,
        record_dispatch => events_dispatched,
        record_delivery => deliveries,
        record_failure => subscriber_failures,
        record_sent => messages_sent,
        record_dropped => messages_dropped,
        record_connection => connections_opened,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the feed counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Text frames read from the connection
    pub frames_received: u64,
    /// Frames that did not deserialize
    pub malformed_frames: u64,
    /// Events refused by the validity predicate
    pub invalid_events: u64,
    /// Events fanned out to subscribers
    pub events_dispatched: u64,
    /// Handler invocations that completed successfully
    pub deliveries: u64,
    /// Handler invocations that errored or panicked
    pub subscriber_failures: u64,
    /// Outbound frames written to the connection
    pub messages_sent: u64,
    /// Outbound messages dropped because no connection was open
    pub messages_dropped: u64,
    pub connections_opened: u64,
}
