//! Typed event record and per-session event log.
//!
//! Every AI-peer event, telephony lifecycle event and bridge-internal
//! transition boils down to one [`EventRecord`] shape. This is the internal
//! event bus the design notes call for: a single in-process publisher
//! (the session) with multiple fan-out subscribers (observers, the
//! persistence sink), replacing the callback graph the reference project
//! uses for its GENA/Sonos event plumbing.

mod log;

pub use log::EventLog;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction of an event from the process's own perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from a peer (telephony or AI).
    Incoming,
    /// Sent to a peer (telephony or AI).
    Outgoing,
}

/// Closed set of event kinds the bridge ever records.
///
/// Anything the AI peer sends that isn't part of the documented mapping
/// still gets recorded, tagged [`EventKind::Unknown`] — the original
/// `type` string is preserved in the event's `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Telephony peer connected and the session is bound.
    CallConnected,
    /// Telephony `start` frame bound or created the session.
    CallStarted,
    /// Session entered its terminal state, normally or on error.
    CallDisconnected,
    /// Telephony `mark` frame, a playback-position synchronization point.
    Mark,
    /// The telephony send mailbox dropped audio under back-pressure.
    TelephonyBackpressure,
    /// AI peer accepted the session configuration.
    SessionCreated,
    /// AI peer accepted an updated session configuration.
    SessionUpdated,
    /// AI peer detected the caller starting to speak.
    InputAudioBufferSpeechStarted,
    /// AI peer detected the caller stopping speaking.
    InputAudioBufferSpeechStopped,
    /// Final transcript of the caller's utterance.
    InputAudioTranscriptionCompleted,
    /// AI peer began a new assistant turn.
    ResponseCreated,
    /// Streaming chunk of assistant audio.
    ResponseOutputAudioDelta,
    /// Assistant audio for the current turn is complete.
    ResponseOutputAudioDone,
    /// Streaming chunk of the assistant's spoken-text transcript.
    ResponseOutputAudioTranscriptDelta,
    /// Final transcript of the assistant's utterance.
    ResponseOutputAudioTranscriptDone,
    /// Assistant turn fully completed (usage/finish reason attached).
    ResponseDone,
    /// Assistant turn was cancelled (barge-in or explicit interrupt).
    ResponseCancelled,
    /// AI peer reported updated rate-limit budgets.
    RateLimitsUpdated,
    /// AI peer WebSocket closed unexpectedly while telephony is still live.
    OpenaiDisconnected,
    /// AI peer reported a fatal, unrecoverable error.
    AiError,
    /// Malformed or unrecognised-but-typed message; session continues.
    ProtocolWarn,
    /// The persistence sink failed; never propagated past the session.
    PersistenceError,
    /// A message type outside the closed AI-peer event set.
    Unknown,
}

/// A single append-only event in a session's timeline.
///
/// `payload` is intentionally opaque (`serde_json::Value`): most payloads
/// are passed through close to verbatim from the AI peer, so re-typing
/// every field here would just be a second, divergent copy of the wire
/// schema. `kind` is what callers branch on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub timestamp_ms: u64,
    pub call_id: String,
    pub kind: EventKind,
    pub direction: Direction,
    pub payload: Value,
}

impl EventRecord {
    pub fn new(
        id: u64,
        timestamp_ms: u64,
        call_id: impl Into<String>,
        kind: EventKind,
        direction: Direction,
        payload: Value,
    ) -> Self {
        Self {
            id,
            timestamp_ms,
            call_id: call_id.into(),
            kind,
            direction,
            payload,
        }
    }

    /// High-frequency audio-adjacent deltas are never persisted individually
    /// (§4.4's `persist_events` carve-out) — only their terminal counterpart
    /// and the final transcript fragment are.
    pub fn is_high_frequency_delta(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ResponseOutputAudioDelta | EventKind::ResponseOutputAudioTranscriptDelta
        )
    }
}
