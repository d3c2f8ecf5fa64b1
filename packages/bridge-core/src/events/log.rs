//! Per-session bounded event ring, with fan-out to observers and a durable
//! persistence sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::persistence::PersistenceSink;
use crate::protocol_constants::{EVENT_LOG_CAP, EVENT_LOG_TRIM_TO, OBSERVER_REPLAY_WINDOW};
use crate::runtime::TaskSpawner;

use super::{Direction, EventKind, EventRecord};

/// Append-only, bounded event timeline for one call.
///
/// Concurrent producers (the AI adapter, the telephony adapter, the bridge
/// orchestrator) serialise through `ring`'s mutex, so events always land in
/// the ring — and therefore in every observer's broadcast stream — in the
/// exact order `record` was called, matching §5's ordering guarantee.
pub struct EventLog {
    call_id: String,
    session_id: String,
    ring: Mutex<VecDeque<EventRecord>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<EventRecord>,
    persistence: Arc<dyn PersistenceSink>,
    persist_events: bool,
    spawner: Arc<dyn TaskSpawner>,
}

impl EventLog {
    pub fn new(
        call_id: impl Into<String>,
        session_id: impl Into<String>,
        persistence: Arc<dyn PersistenceSink>,
        persist_events: bool,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(EVENT_LOG_CAP);
        Self {
            call_id: call_id.into(),
            session_id: session_id.into(),
            ring: Mutex::new(VecDeque::with_capacity(EVENT_LOG_CAP)),
            next_id: AtomicU64::new(1),
            broadcast_tx,
            persistence,
            persist_events,
            spawner,
        }
    }

    /// Records an event: assigns it an id and timestamp, appends it to the
    /// ring (trimming if the cap is reached), fans it out to subscribers,
    /// and — for the persisted subset — hands it to the durable sink.
    pub fn record(
        &self,
        kind: EventKind,
        direction: Direction,
        payload: serde_json::Value,
    ) -> EventRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timestamp_ms = crate::utils::now_millis();
        let event = EventRecord::new(id, timestamp_ms, self.call_id.clone(), kind, direction, payload);

        {
            let mut ring = self.ring.lock();
            ring.push_back(event.clone());
            if ring.len() > EVENT_LOG_CAP {
                let drop_count = ring.len() - EVENT_LOG_TRIM_TO;
                ring.drain(0..drop_count);
            }
            // Sent while still holding the ring lock: two concurrent
            // `record()` callers must reach the broadcast channel in the
            // same order they reach the ring, or observers could see events
            // out of record order (§5's ordering guarantee).
            //
            // No receivers is the common case between calls; that's fine,
            // this is fan-out, not delivery-guaranteed messaging.
            let _ = self.broadcast_tx.send(event.clone());
        }

        if self.persist_events && !event.is_high_frequency_delta() {
            let persistence = Arc::clone(&self.persistence);
            let session_id = self.session_id.clone();
            let to_persist = event.clone();
            self.spawner.spawn(async move {
                if let Err(err) = persistence
                    .append_event(&session_id, to_persist.kind, to_persist.direction, to_persist.payload)
                    .await
                {
                    tracing::warn!(call_id = %to_persist.call_id, %err, "event persistence failed");
                }
            });
        }

        event
    }

    /// Subscribes to this session's live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.broadcast_tx.subscribe()
    }

    /// Returns up to the last `OBSERVER_REPLAY_WINDOW` events, oldest first,
    /// for an observer that just subscribed.
    pub fn replay(&self) -> Vec<EventRecord> {
        let ring = self.ring.lock();
        let len = ring.len();
        let skip = len.saturating_sub(OBSERVER_REPLAY_WINDOW);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Total number of events recorded (including trimmed ones).
    pub fn event_count(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NoopPersistenceSink;
    use crate::runtime::TokioSpawner;
    use serde_json::json;

    fn make_log() -> EventLog {
        EventLog::new(
            "CA1",
            "sess-1",
            Arc::new(NoopPersistenceSink),
            true,
            Arc::new(TokioSpawner::current()),
        )
    }

    #[tokio::test]
    async fn record_assigns_increasing_ids() {
        let log = make_log();
        let e1 = log.record(EventKind::CallConnected, Direction::Incoming, json!({}));
        let e2 = log.record(EventKind::CallStarted, Direction::Incoming, json!({}));
        assert_eq!(e1.id, 1);
        assert_eq!(e2.id, 2);
    }

    #[tokio::test]
    async fn replay_returns_events_in_order() {
        let log = make_log();
        for _ in 0..5 {
            log.record(EventKind::Mark, Direction::Incoming, json!({}));
        }
        let replay = log.replay();
        assert_eq!(replay.len(), 5);
        assert!(replay.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn replay_caps_to_window() {
        let log = make_log();
        for _ in 0..(crate::protocol_constants::OBSERVER_REPLAY_WINDOW + 10) {
            log.record(EventKind::Mark, Direction::Incoming, json!({}));
        }
        assert_eq!(log.replay().len(), crate::protocol_constants::OBSERVER_REPLAY_WINDOW);
    }

    #[tokio::test]
    async fn ring_trims_once_cap_exceeded() {
        let log = make_log();
        for _ in 0..(crate::protocol_constants::EVENT_LOG_CAP + 1) {
            log.record(EventKind::Mark, Direction::Incoming, json!({}));
        }
        assert_eq!(log.ring.lock().len(), crate::protocol_constants::EVENT_LOG_TRIM_TO);
    }

    #[tokio::test]
    async fn subscribers_receive_events_broadcast() {
        let log = make_log();
        let mut rx = log.subscribe();
        log.record(EventKind::CallConnected, Direction::Incoming, json!({}));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::CallConnected);
    }
}
