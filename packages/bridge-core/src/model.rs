//! Core data model: `CallSession` and the records it owns (§3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::config::SessionConfig;
use crate::ai::protocol::AiOutbound;
use crate::audio::frame_buffer::FrameBuffer;
use crate::events::EventLog;
use crate::recorder::Recorder;
use crate::telephony::{TelephonyMailbox, TelephonyOutbound};

/// Which side of the call a piece of audio or a transcript fragment
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// Who initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Bridge lifecycle states (§4.9). `Error` is reachable from any
/// non-terminal state; `Ended` and `Error` are both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initializing,
    TelephonyConnected,
    ConnectingAi,
    Active,
    AiDisconnected,
    Ended,
    Error,
}

impl CallState {
    /// Terminal states never advance further.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }
}

/// Immutable unit of decoded audio, 24 kHz mono PCM16 (§3).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub track: Speaker,
    pub relative_timestamp_ms: u64,
    pub samples: Vec<i16>,
}

/// A final (non-delta) piece of transcript (§3). Deltas are events, not
/// fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub speaker: Speaker,
    pub text: String,
    pub relative_timestamp_ms: u64,
}

/// A finished recording artifact (§3). Only produced once the session ends
/// and the recorder accepts the result (§4.3's minimum-duration rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: String,
    pub call_id: String,
    pub path: String,
    pub duration_seconds: f64,
    pub bytes: u64,
}

/// Statistics bundle carried on every session (§3.1).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub event_count: u64,
    pub total_audio_ms: u64,
    pub sequence: u64,
}

/// Read-only projection of a `CallSession` with no peer handles (§3.1),
/// returned by observer queries and handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    pub id: String,
    pub call_id: String,
    pub direction: CallDirection,
    pub peer_number: String,
    pub created_at_ms: u64,
    pub state: CallState,
    pub telephony_stream_id: Option<String>,
    pub stats: SessionStats,
}

/// Per-call bridge session: the sole owner of a call's state, peers and
/// sub-components. Held exclusively by the [`crate::registry::SessionRegistry`];
/// every other component reaches it only through the registry by `call_id`,
/// never via a shared reference held across an await point on another
/// session (§9's cyclic-reference re-architecture).
pub struct CallSession {
    pub id: String,
    pub call_id: String,
    pub direction: CallDirection,
    pub peer_number: String,
    pub created_at_ms: u64,
    created_at: Instant,

    state: Mutex<CallState>,
    config: RwLock<SessionConfig>,
    telephony_stream_id: Mutex<Option<String>>,
    stats: Mutex<SessionStats>,

    pub event_log: EventLog,
    pub recorder: Recorder,
    frame_buffer: Mutex<FrameBuffer>,
    transcripts: Mutex<Vec<TranscriptFragment>>,

    telephony_mailbox: Mutex<Option<Arc<TelephonyMailbox>>>,
    ai_outbound: Mutex<Option<mpsc::UnboundedSender<AiOutbound>>>,
    /// True while the assistant is actively emitting audio for the current
    /// turn; drives barge-in eligibility (§4.5).
    assistant_speaking: AtomicBool,

    pub cancel_token: CancellationToken,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        direction: CallDirection,
        peer_number: impl Into<String>,
        config: SessionConfig,
        event_log: EventLog,
        recorder: Recorder,
        frame_buffer_target_samples: usize,
        frame_buffer_flush_interval_ms: u64,
        parent_cancel: &CancellationToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            direction,
            peer_number: peer_number.into(),
            created_at_ms: crate::utils::now_millis(),
            created_at: Instant::now(),
            state: Mutex::new(CallState::Initializing),
            config: RwLock::new(config),
            telephony_stream_id: Mutex::new(None),
            stats: Mutex::new(SessionStats::default()),
            event_log,
            recorder,
            frame_buffer: Mutex::new(FrameBuffer::with_target(
                frame_buffer_target_samples,
                frame_buffer_flush_interval_ms,
            )),
            transcripts: Mutex::new(Vec::new()),
            telephony_mailbox: Mutex::new(None),
            ai_outbound: Mutex::new(None),
            assistant_speaking: AtomicBool::new(false),
            cancel_token: parent_cancel.child_token(),
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Unconditionally sets the state. Callers are responsible for only
    /// moving forward through the lifecycle (§3's monotonic invariant);
    /// the one sanctioned exception is the transient `reconnecting->active`
    /// style return, which this crate's lifecycle never exercises since
    /// §4.5 forbids AI reconnects within a session.
    pub fn set_state(&self, new_state: CallState) {
        *self.state.lock() = new_state;
    }

    /// Sets the state only if the current state is not already terminal,
    /// so a late event can't resurrect an ended/errored session.
    pub fn set_state_if_live(&self, new_state: CallState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = new_state;
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: SessionConfig) {
        *self.config.write() = config;
    }

    /// Set exactly once, on the telephony `start` frame (§3's invariant).
    pub fn bind_telephony_stream_id(&self, stream_id: String) -> bool {
        let mut slot = self.telephony_stream_id.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(stream_id);
        true
    }

    pub fn telephony_stream_id(&self) -> Option<String> {
        self.telephony_stream_id.lock().clone()
    }

    pub fn set_telephony_mailbox(&self, mailbox: Arc<TelephonyMailbox>) {
        *self.telephony_mailbox.lock() = Some(mailbox);
    }

    pub fn telephony_mailbox(&self) -> Option<Arc<TelephonyMailbox>> {
        self.telephony_mailbox.lock().clone()
    }

    pub fn set_ai_outbound(&self, sender: mpsc::UnboundedSender<AiOutbound>) {
        *self.ai_outbound.lock() = Some(sender);
    }

    pub fn clear_ai_outbound(&self) {
        *self.ai_outbound.lock() = None;
    }

    /// Sends a message to the AI peer's outbound mailbox, if one is wired
    /// up (i.e. the session isn't `ai-disconnected`).
    pub fn send_to_ai(&self, message: AiOutbound) -> bool {
        self.next_sequence();
        match self.ai_outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn send_to_telephony(&self, message: TelephonyOutbound) -> bool {
        match self.telephony_mailbox.lock().as_ref() {
            Some(mailbox) => mailbox.push(message),
            None => false,
        }
    }

    pub fn assistant_speaking(&self) -> bool {
        self.assistant_speaking.load(Ordering::SeqCst)
    }

    pub fn set_assistant_speaking(&self, speaking: bool) {
        self.assistant_speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }

    pub fn append_transcript(&self, fragment: TranscriptFragment) {
        self.transcripts.lock().push(fragment);
    }

    pub fn transcripts(&self) -> Vec<TranscriptFragment> {
        self.transcripts.lock().clone()
    }

    pub fn add_audio_ms(&self, ms: u64) {
        self.stats.lock().total_audio_ms += ms;
    }

    /// Advances and returns this session's outbound AI message sequence
    /// number (§3.1); called once per message handed to the AI peer so the
    /// session record always reflects how many have gone out.
    fn next_sequence(&self) -> u64 {
        let mut stats = self.stats.lock();
        stats.sequence += 1;
        stats.sequence
    }

    /// `event_count` is read straight from the event log's own counter
    /// rather than tracked separately, so it can never drift from what
    /// was actually recorded.
    pub fn stats(&self) -> SessionStats {
        let mut stats = *self.stats.lock();
        stats.event_count = self.event_log.event_count();
        stats
    }

    /// Accumulates decoded caller audio and returns a flushed block if the
    /// frame buffer's target size has been reached (§4.2).
    pub fn buffer_user_audio(&self, samples: &[i16]) -> Option<Vec<i16>> {
        self.frame_buffer.lock().append(samples)
    }

    /// Forces a flush of whatever the frame buffer holds if the flush
    /// interval has elapsed (§4.2's periodic tick).
    pub fn tick_frame_buffer(&self) -> Option<Vec<i16>> {
        self.frame_buffer.lock().tick()
    }

    /// Drains whatever the frame buffer holds at shutdown (§4.2).
    pub fn drain_frame_buffer(&self) -> Vec<i16> {
        self.frame_buffer.lock().drain()
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            id: self.id.clone(),
            call_id: self.call_id.clone(),
            direction: self.direction,
            peer_number: self.peer_number.clone(),
            created_at_ms: self.created_at_ms,
            state: self.state(),
            telephony_stream_id: self.telephony_stream_id(),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NoopPersistenceSink;
    use crate::runtime::TokioSpawner;

    fn make_session() -> CallSession {
        let cancel = CancellationToken::new();
        CallSession::new(
            "CA1",
            CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            EventLog::new(
                "CA1",
                "sess-1",
                Arc::new(NoopPersistenceSink),
                true,
                Arc::new(TokioSpawner::current()),
            ),
            Recorder::new_discarded(),
            2400,
            100,
            &cancel,
        )
    }

    #[tokio::test]
    async fn telephony_stream_id_binds_exactly_once() {
        let session = make_session();
        assert!(session.bind_telephony_stream_id("MZ1".to_string()));
        assert!(!session.bind_telephony_stream_id("MZ2".to_string()));
        assert_eq!(session.telephony_stream_id(), Some("MZ1".to_string()));
    }

    #[tokio::test]
    async fn state_does_not_move_once_terminal() {
        let session = make_session();
        session.set_state(CallState::Ended);
        session.set_state_if_live(CallState::Active);
        assert_eq!(session.state(), CallState::Ended);
    }

    #[tokio::test]
    async fn sequence_increments_monotonically() {
        let session = make_session();
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
    }

    #[tokio::test]
    async fn assistant_speaking_flag_round_trips() {
        let session = make_session();
        assert!(!session.assistant_speaking());
        session.set_assistant_speaking(true);
        assert!(session.assistant_speaking());
    }
}
