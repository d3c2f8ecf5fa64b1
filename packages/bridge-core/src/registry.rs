//! Thread-safe registry of active call sessions (§4.1).
//!
//! Provides keyed storage and idempotent creation of [`CallSession`]
//! instances, mirroring the reference project's `StreamRegistry`: a
//! low-level data structure with no orchestration logic of its own. The
//! lifecycle wiring (which peers feed which session, when to tear one down)
//! lives in [`crate::orchestrator`].

use std::sync::Arc;

use dashmap::DashMap;

use crate::ai::config::SessionConfig;
use crate::events::EventLog;
use crate::model::{CallDirection, CallSession, CallSummary};
use crate::recorder::Recorder;
use crate::runtime::TaskSpawner;

/// Registry of live call sessions, keyed by the telephony provider's call id
/// (§3's `call_id`).
///
/// Every component that needs to reach a session's peers or state goes
/// through this registry by `call_id` rather than holding a long-lived
/// `Arc<CallSession>` across an await point on a *different* session —
/// the re-architecture the design notes call for to avoid a cyclic
/// reference graph (§9).
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Creates a session for `call_id` if one doesn't already exist.
    /// Returns the existing session unchanged if it does — duplicate
    /// `start` frames on telephony reconnect must not spawn a second
    /// session for the same call (§4.1's idempotency requirement).
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create(
        &self,
        call_id: &str,
        direction: CallDirection,
        peer_number: &str,
        config: SessionConfig,
        event_log: EventLog,
        recorder: Recorder,
        frame_buffer_target_samples: usize,
        frame_buffer_flush_interval_ms: u64,
        parent_cancel: &tokio_util::sync::CancellationToken,
    ) -> Arc<CallSession> {
        if let Some(existing) = self.sessions.get(call_id) {
            return Arc::clone(existing.value());
        }
        let session = Arc::new(CallSession::new(
            call_id,
            direction,
            peer_number,
            config,
            event_log,
            recorder,
            frame_buffer_target_samples,
            frame_buffer_flush_interval_ms,
            parent_cancel,
        ));
        self.sessions
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::clone(&session));
        Arc::clone(self.sessions.get(call_id).unwrap().value())
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|r| Arc::clone(r.value()))
    }

    /// Removes a session from the registry. The caller is responsible for
    /// having already cancelled the session's token and drained its peers;
    /// this call only affects discoverability, not teardown (§4.1).
    pub fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.remove(call_id).map(|(_, session)| session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn list_summaries(&self) -> Vec<CallSummary> {
        self.sessions.iter().map(|r| r.value().summary()).collect()
    }

    /// Cancels every live session's token, used on process shutdown so no
    /// in-flight task outlives the server (§5's graceful-shutdown note).
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel_token.cancel();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::config::SessionConfig;
    use crate::persistence::NoopPersistenceSink;
    use crate::runtime::TokioSpawner;
    use tokio_util::sync::CancellationToken;

    fn make_registry() -> SessionRegistry {
        SessionRegistry::new()
    }

    fn make_event_log(call_id: &str) -> EventLog {
        EventLog::new(
            call_id,
            "sess",
            Arc::new(NoopPersistenceSink),
            false,
            Arc::new(TokioSpawner::current()),
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_call_id() {
        let registry = make_registry();
        let cancel = CancellationToken::new();
        let a = registry.get_or_create(
            "CA1",
            CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            make_event_log("CA1"),
            Recorder::new_discarded(),
            2400,
            100,
            &cancel,
        );
        let b = registry.get_or_create(
            "CA1",
            CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            make_event_log("CA1"),
            Recorder::new_discarded(),
            2400,
            100,
            &cancel,
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn remove_drops_session_from_registry() {
        let registry = make_registry();
        let cancel = CancellationToken::new();
        registry.get_or_create(
            "CA1",
            CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            make_event_log("CA1"),
            Recorder::new_discarded(),
            2400,
            100,
            &cancel,
        );
        assert!(registry.remove("CA1").is_some());
        assert!(registry.get("CA1").is_none());
    }

    #[tokio::test]
    async fn cancel_all_cancels_every_session_token() {
        let registry = make_registry();
        let cancel = CancellationToken::new();
        let session = registry.get_or_create(
            "CA1",
            CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            make_event_log("CA1"),
            Recorder::new_discarded(),
            2400,
            100,
            &cancel,
        );
        registry.cancel_all();
        assert!(session.cancel_token.is_cancelled());
    }
}
