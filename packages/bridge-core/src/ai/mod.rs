//! AI realtime peer adapter (§4.5) — the hardest component.
//!
//! Split in two, the way the reference project keeps its Sonos SOAP/GENA
//! logic testable without a live device: [`react_to_event`] is a plain
//! synchronous function over [`CallSession`]'s already-testable interior
//! state, so every inbound-event reaction (barge-in, transcript
//! accumulation, state transitions) is unit-testable with no WebSocket at
//! all. [`run_ai_peer`] is the thin async task that owns the live
//! connection and feeds it.

pub mod config;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;

use crate::audio::{pcm16_bytes_to_samples, pcm24k_to_mulaw};
use crate::config::BridgeConfig;
use crate::events::{Direction, EventKind};
use crate::model::{CallSession, CallState, Speaker, TranscriptFragment};
use crate::telephony::TelephonyOutbound;

use protocol::{parse_inbound, AiInbound, AiOutbound};

/// Reacts to one parsed inbound AI-peer event against a session's state,
/// returning any telephony-bound messages the caller should forward.
/// Side effects on the session (state transitions, event log entries,
/// sends back to the AI peer) happen inline, the same way the reference
/// project's service layer mutates `SonosState` directly rather than
/// returning a diff.
pub fn react_to_event(session: &CallSession, event: AiInbound) -> Vec<TelephonyOutbound> {
    let mut outbound = Vec::new();

    match event {
        AiInbound::SessionCreated => {
            session
                .event_log
                .record(EventKind::SessionCreated, Direction::Incoming, json!({}));
            session.set_state_if_live(CallState::Active);
        }
        AiInbound::SessionUpdated => {
            session
                .event_log
                .record(EventKind::SessionUpdated, Direction::Incoming, json!({}));
        }
        AiInbound::InputAudioBufferSpeechStarted => {
            session.event_log.record(
                EventKind::InputAudioBufferSpeechStarted,
                Direction::Incoming,
                json!({}),
            );
            let interrupt_allowed = session.config().turn_detection.interrupt_response();
            if session.assistant_speaking() && interrupt_allowed {
                session.send_to_ai(AiOutbound::ResponseCancel);
                session.event_log.record(
                    EventKind::ResponseCancelled,
                    Direction::Outgoing,
                    json!({ "reason": "barge_in" }),
                );
                session.set_assistant_speaking(false);
                if let Some(stream_id) = session.telephony_stream_id() {
                    if let Some(mailbox) = session.telephony_mailbox() {
                        mailbox.clear();
                    }
                    outbound.push(TelephonyOutbound::Clear { stream_id });
                }
            }
        }
        AiInbound::InputAudioBufferSpeechStopped => {
            session.event_log.record(
                EventKind::InputAudioBufferSpeechStopped,
                Direction::Incoming,
                json!({}),
            );
        }
        AiInbound::InputAudioTranscriptionCompleted { transcript } => {
            session.append_transcript(TranscriptFragment {
                speaker: Speaker::User,
                text: transcript.clone(),
                relative_timestamp_ms: session.elapsed_ms(),
            });
            session.event_log.record(
                EventKind::InputAudioTranscriptionCompleted,
                Direction::Incoming,
                json!({ "transcript": transcript }),
            );
        }
        AiInbound::ResponseCreated => {
            session
                .event_log
                .record(EventKind::ResponseCreated, Direction::Incoming, json!({}));
            session.set_assistant_speaking(true);
        }
        AiInbound::ResponseOutputAudioDelta { audio_b64 } => {
            session.event_log.record(
                EventKind::ResponseOutputAudioDelta,
                Direction::Incoming,
                json!({}),
            );
            if let Ok(raw) = BASE64.decode(&audio_b64) {
                let samples = pcm16_bytes_to_samples(&raw);
                session.recorder.ingest_assistant(&samples);
                if let Some(stream_id) = session.telephony_stream_id() {
                    let mulaw = pcm24k_to_mulaw(&samples);
                    outbound.push(TelephonyOutbound::Media {
                        stream_id,
                        payload_b64: BASE64.encode(mulaw),
                    });
                }
            } else {
                session.event_log.record(
                    EventKind::ProtocolWarn,
                    Direction::Incoming,
                    json!({ "reason": "invalid base64 audio delta" }),
                );
            }
        }
        AiInbound::ResponseOutputAudioDone => {
            session.set_assistant_speaking(false);
            session.event_log.record(
                EventKind::ResponseOutputAudioDone,
                Direction::Incoming,
                json!({}),
            );
        }
        AiInbound::ResponseOutputAudioTranscriptDelta { delta } => {
            session.event_log.record(
                EventKind::ResponseOutputAudioTranscriptDelta,
                Direction::Incoming,
                json!({ "delta": delta }),
            );
        }
        AiInbound::ResponseOutputAudioTranscriptDone { transcript } => {
            session.append_transcript(TranscriptFragment {
                speaker: Speaker::Assistant,
                text: transcript.clone(),
                relative_timestamp_ms: session.elapsed_ms(),
            });
            session.event_log.record(
                EventKind::ResponseOutputAudioTranscriptDone,
                Direction::Incoming,
                json!({ "transcript": transcript }),
            );
        }
        AiInbound::ResponseDone { usage, finish_reason } => {
            session.event_log.record(
                EventKind::ResponseDone,
                Direction::Incoming,
                json!({ "usage": usage, "finishReason": finish_reason }),
            );
        }
        AiInbound::ResponseCancelled => {
            session.event_log.record(
                EventKind::ResponseCancelled,
                Direction::Incoming,
                json!({}),
            );
            if let Some(stream_id) = session.telephony_stream_id() {
                if let Some(mailbox) = session.telephony_mailbox() {
                    mailbox.clear();
                }
                outbound.push(TelephonyOutbound::Clear { stream_id });
            }
        }
        AiInbound::RateLimitsUpdated => {
            session
                .event_log
                .record(EventKind::RateLimitsUpdated, Direction::Incoming, json!({}));
        }
        AiInbound::Error { fatal, message } => {
            session.event_log.record(
                EventKind::AiError,
                Direction::Incoming,
                json!({ "fatal": fatal, "message": message }),
            );
            if fatal {
                session.set_state(CallState::Error);
                session.cancel_token.cancel();
            }
        }
        AiInbound::Unknown { raw_type } => {
            session.event_log.record(
                EventKind::Unknown,
                Direction::Incoming,
                json!({ "rawType": raw_type }),
            );
        }
    }

    outbound
}

/// Owns the AI-peer WebSocket for the lifetime of a session (§4.5, §6.2).
///
/// Connects with a bounded deadline, sends the initial `session.update`,
/// then runs two halves concurrently: draining `session`'s AI-outbound
/// mailbox to the socket, and reading inbound frames, reacting via
/// [`react_to_event`] and forwarding any resulting telephony messages.
/// Exits on session cancellation, on AI-peer close (marks
/// `ai-disconnected`, per §4.5's no-reconnect rule), or on a fatal error.
pub async fn run_ai_peer(session: Arc<CallSession>, config: BridgeConfig) {
    session.set_state_if_live(CallState::ConnectingAi);

    let mut request = match config.ai_endpoint_url.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            tracing::error!(call_id = %session.call_id, %err, "invalid AI endpoint URL");
            session.set_state(CallState::Error);
            return;
        }
    };
    let auth_value = match HeaderValue::from_str(&format!("Bearer {}", config.ai_bearer_token)) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(call_id = %session.call_id, %err, "invalid AI bearer token");
            session.set_state(CallState::Error);
            return;
        }
    };
    request.headers_mut().insert(AUTHORIZATION, auth_value);

    let connect_result = timeout(
        Duration::from_secs(config.ai_connect_timeout_secs),
        tokio_tungstenite::connect_async(request),
    )
    .await;

    let ws_stream = match connect_result {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            tracing::warn!(call_id = %session.call_id, %err, "AI peer connect failed");
            session.set_state(CallState::Error);
            session.event_log.record(
                EventKind::AiError,
                Direction::Incoming,
                json!({ "fatal": true, "message": err.to_string() }),
            );
            return;
        }
        Err(_) => {
            tracing::warn!(call_id = %session.call_id, "AI peer connect timed out");
            session.set_state(CallState::Error);
            session.event_log.record(
                EventKind::AiError,
                Direction::Incoming,
                json!({ "fatal": true, "message": "AI peer connect timed out" }),
            );
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    let initial_update = AiOutbound::SessionUpdate(session.config()).to_json();
    if write.send(Message::Text(initial_update.to_string().into())).await.is_err() {
        session.set_state(CallState::Error);
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<AiOutbound>();
    session.set_ai_outbound(outbound_tx);

    let cancel = session.cancel_token.clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let payload = message.to_json().to_string();
                        if write.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(raw) => {
                                let event = parse_inbound(&raw);
                                let to_forward = react_to_event(&session, event);
                                for message in to_forward {
                                    session.send_to_telephony(message);
                                }
                            }
                            Err(err) => {
                                session.event_log.record(
                                    EventKind::ProtocolWarn,
                                    Direction::Incoming,
                                    json!({ "reason": format!("malformed AI frame: {err}") }),
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(call_id = %session.call_id, %err, "AI peer transport error");
                        break;
                    }
                }
            }
        }

        if session.state() == CallState::Error {
            break;
        }
    }

    session.clear_ai_outbound();
    if session.state() != CallState::Error && !session.cancel_token.is_cancelled() {
        session.set_state_if_live(CallState::AiDisconnected);
        session.event_log.record(
            EventKind::OpenaiDisconnected,
            Direction::Incoming,
            json!({}),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::config::SessionConfig;
    use crate::persistence::NoopPersistenceSink;
    use crate::recorder::Recorder;
    use crate::runtime::TokioSpawner;
    use tokio_util::sync::CancellationToken;

    fn make_session() -> CallSession {
        CallSession::new(
            "CA1",
            crate::model::CallDirection::Inbound,
            "+15551234567",
            SessionConfig::default(),
            crate::events::EventLog::new(
                "CA1",
                "sess-1",
                Arc::new(NoopPersistenceSink),
                false,
                Arc::new(TokioSpawner::current()),
            ),
            Recorder::new_discarded(),
            2400,
            100,
            &CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn session_created_activates_session() {
        let session = make_session();
        session.set_state(CallState::ConnectingAi);
        react_to_event(&session, AiInbound::SessionCreated);
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn speech_started_cancels_and_clears_when_assistant_speaking() {
        let session = make_session();
        session.bind_telephony_stream_id("MZ1".to_string());
        session.set_telephony_mailbox(Arc::new(crate::telephony::TelephonyMailbox::with_default_high_water()));
        session.set_assistant_speaking(true);

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_ai_outbound(tx);

        let outbound = react_to_event(&session, AiInbound::InputAudioBufferSpeechStarted);

        assert!(!session.assistant_speaking());
        assert!(matches!(outbound.as_slice(), [TelephonyOutbound::Clear { .. }]));
        assert!(matches!(rx.try_recv(), Ok(AiOutbound::ResponseCancel)));
    }

    #[tokio::test]
    async fn speech_started_does_nothing_when_assistant_is_silent() {
        let session = make_session();
        session.bind_telephony_stream_id("MZ1".to_string());
        let outbound = react_to_event(&session, AiInbound::InputAudioBufferSpeechStarted);
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn fatal_error_transitions_to_error_and_cancels() {
        let session = make_session();
        react_to_event(
            &session,
            AiInbound::Error { fatal: true, message: "boom".to_string() },
        );
        assert_eq!(session.state(), CallState::Error);
        assert!(session.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn nonfatal_error_does_not_tear_down_session() {
        let session = make_session();
        session.set_state(CallState::Active);
        react_to_event(
            &session,
            AiInbound::Error { fatal: false, message: "retry me".to_string() },
        );
        assert_eq!(session.state(), CallState::Active);
        assert!(!session.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn transcription_completed_appends_user_fragment() {
        let session = make_session();
        react_to_event(
            &session,
            AiInbound::InputAudioTranscriptionCompleted { transcript: "hello there".to_string() },
        );
        let fragments = session.transcripts();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "hello there");
        assert_eq!(fragments[0].speaker, Speaker::User);
    }

    #[tokio::test]
    async fn response_cancelled_clears_telephony_output() {
        let session = make_session();
        session.bind_telephony_stream_id("MZ1".to_string());
        let outbound = react_to_event(&session, AiInbound::ResponseCancelled);
        assert!(matches!(outbound.as_slice(), [TelephonyOutbound::Clear { .. }]));
    }
}
