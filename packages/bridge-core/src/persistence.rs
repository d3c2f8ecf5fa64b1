//! Persistence abstraction for call sessions, events, transcripts and
//! recordings (§6.4).
//!
//! Services depend on the [`PersistenceSink`] trait rather than a concrete
//! store, the same way the reference project decouples its services from
//! transport via `EventEmitter`. Wiring an actual database/object store is
//! explicitly out of scope (spec's Non-goals rule out storage-engine
//! design); the two implementations here cover every environment this
//! crate ships for.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::events::{Direction, EventKind};
use crate::model::{CallDirection, CallState, Speaker};

/// Row shape for `upsert_call_session` (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSessionRow {
    pub id: String,
    pub call_id: String,
    pub direction: CallDirection,
    pub peer_number: String,
    pub created_at_ms: u64,
    pub state: CallState,
}

/// Row shape for `insert_recording` (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRow {
    pub recording_id: String,
    pub call_id: String,
    pub path: String,
    pub duration_seconds: f64,
    pub bytes: u64,
}

/// Outcome recorded for a call that has finished (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Completed,
    Failed,
}

/// Durable-storage boundary for call sessions, events, transcripts and
/// recordings. No implementation in this crate talks to a real database;
/// wiring one is left to the embedding application (§6.4, spec Non-goals).
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert_call_session(&self, row: CallSessionRow) -> BridgeResult<()>;

    async fn update_call_session_end(
        &self,
        call_id: &str,
        duration_seconds: f64,
        status: CallOutcome,
    ) -> BridgeResult<()>;

    async fn append_event(
        &self,
        session_id: &str,
        kind: EventKind,
        direction: Direction,
        payload: serde_json::Value,
    ) -> BridgeResult<()>;

    async fn append_transcript(
        &self,
        session_id: &str,
        speaker: Speaker,
        text: &str,
        relative_timestamp_ms: u64,
    ) -> BridgeResult<()>;

    async fn insert_recording(&self, row: RecordingRow) -> BridgeResult<()>;
}

/// Discards everything. Used in tests and in environments with no
/// persistence wired up (mirroring `NoopEventEmitter`).
pub struct NoopPersistenceSink;

#[async_trait]
impl PersistenceSink for NoopPersistenceSink {
    async fn upsert_call_session(&self, _row: CallSessionRow) -> BridgeResult<()> {
        Ok(())
    }

    async fn update_call_session_end(
        &self,
        _call_id: &str,
        _duration_seconds: f64,
        _status: CallOutcome,
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn append_event(
        &self,
        _session_id: &str,
        _kind: EventKind,
        _direction: Direction,
        _payload: serde_json::Value,
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn append_transcript(
        &self,
        _session_id: &str,
        _speaker: Speaker,
        _text: &str,
        _relative_timestamp_ms: u64,
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn insert_recording(&self, _row: RecordingRow) -> BridgeResult<()> {
        Ok(())
    }
}

/// Logs every call at debug level instead of discarding it. Used for
/// local/dev runs with no external store configured (mirroring
/// `LoggingEventEmitter`).
pub struct LoggingPersistenceSink;

#[async_trait]
impl PersistenceSink for LoggingPersistenceSink {
    async fn upsert_call_session(&self, row: CallSessionRow) -> BridgeResult<()> {
        tracing::debug!(call_id = %row.call_id, state = ?row.state, "upsert_call_session");
        Ok(())
    }

    async fn update_call_session_end(
        &self,
        call_id: &str,
        duration_seconds: f64,
        status: CallOutcome,
    ) -> BridgeResult<()> {
        tracing::debug!(call_id, duration_seconds, ?status, "update_call_session_end");
        Ok(())
    }

    async fn append_event(
        &self,
        session_id: &str,
        kind: EventKind,
        direction: Direction,
        payload: serde_json::Value,
    ) -> BridgeResult<()> {
        tracing::debug!(session_id, ?kind, ?direction, %payload, "append_event");
        Ok(())
    }

    async fn append_transcript(
        &self,
        session_id: &str,
        speaker: Speaker,
        text: &str,
        relative_timestamp_ms: u64,
    ) -> BridgeResult<()> {
        tracing::debug!(session_id, ?speaker, text, relative_timestamp_ms, "append_transcript");
        Ok(())
    }

    async fn insert_recording(&self, row: RecordingRow) -> BridgeResult<()> {
        tracing::debug!(call_id = %row.call_id, path = %row.path, "insert_recording");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        let sink = NoopPersistenceSink;
        sink.upsert_call_session(CallSessionRow {
            id: "s1".to_string(),
            call_id: "CA1".to_string(),
            direction: CallDirection::Inbound,
            peer_number: "+15551234567".to_string(),
            created_at_ms: 0,
            state: CallState::Initializing,
        })
        .await
        .unwrap();
        sink.append_event("s1", EventKind::Mark, Direction::Incoming, json!({}))
            .await
            .unwrap();
        sink.append_transcript("s1", Speaker::User, "hi", 0)
            .await
            .unwrap();
        sink.insert_recording(RecordingRow {
            recording_id: "r1".to_string(),
            call_id: "CA1".to_string(),
            path: "/tmp/r1.wav".to_string(),
            duration_seconds: 1.0,
            bytes: 100,
        })
        .await
        .unwrap();
        sink.update_call_session_end("CA1", 1.0, CallOutcome::Completed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn logging_sink_accepts_everything() {
        let sink = LoggingPersistenceSink;
        sink.upsert_call_session(CallSessionRow {
            id: "s1".to_string(),
            call_id: "CA1".to_string(),
            direction: CallDirection::Outbound,
            peer_number: "+15551234567".to_string(),
            created_at_ms: 0,
            state: CallState::Active,
        })
        .await
        .unwrap();
        sink.update_call_session_end("CA1", 42.5, CallOutcome::Failed)
            .await
            .unwrap();
    }
}
