//! Wire message shapes for the AI realtime WebSocket (§4.5, §6.2).
//!
//! Outbound messages are built from a closed [`AiOutbound`] enum; inbound
//! messages are parsed into a closed [`AiInbound`] enum, with
//! [`AiInbound::Unknown`] absorbing any type outside the documented mapping
//! (the raw JSON is preserved by the caller, not dropped).

use serde_json::{json, Value};

use crate::ai::config::SessionConfig;

/// Role for an injected conversation item (`conversation.item.create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

/// Closed set of outbound message kinds (§4.5).
#[derive(Debug, Clone)]
pub enum AiOutbound {
    SessionUpdate(SessionConfig),
    InputAudioBufferAppend { audio_b64: String },
    InputAudioBufferCommit,
    InputAudioBufferClear,
    ResponseCreate,
    ResponseCancel,
    ConversationItemCreate { role: ConversationRole, text: String },
}

impl AiOutbound {
    /// Serialises this message into the JSON shape sent on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            AiOutbound::SessionUpdate(config) => json!({
                "type": "session.update",
                "session": build_session_payload(config),
            }),
            AiOutbound::InputAudioBufferAppend { audio_b64 } => json!({
                "type": "input_audio_buffer.append",
                "audio": audio_b64,
            }),
            AiOutbound::InputAudioBufferCommit => json!({
                "type": "input_audio_buffer.commit",
            }),
            AiOutbound::InputAudioBufferClear => json!({
                "type": "input_audio_buffer.clear",
            }),
            AiOutbound::ResponseCreate => json!({
                "type": "response.create",
            }),
            AiOutbound::ResponseCancel => json!({
                "type": "response.cancel",
            }),
            AiOutbound::ConversationItemCreate { role, text } => json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": role,
                    "content": [{ "type": "input_text", "text": text }],
                },
            }),
        }
    }
}

/// Builds the `session` object of a `session.update` message: the caller's
/// config plus the fixed fields the contract always sends (§4.5).
fn build_session_payload(config: &SessionConfig) -> Value {
    let mut payload = json!({
        "modalities": ["audio", "text"],
        "input_audio_format": "pcm16",
        "output_audio_format": "pcm16",
        "voice": config.voice,
        "instructions": config.instructions,
        "temperature": config.temperature,
        "turn_detection": config.turn_detection,
    });

    let obj = payload.as_object_mut().expect("payload is an object");
    if let Some(speed) = config.wire_voice_speed() {
        obj.insert("voice_speed".to_string(), json!(speed));
    }
    if let Some(tokens) = &config.max_output_tokens {
        obj.insert("max_output_tokens".to_string(), json!(tokens));
    }
    if let Some(transcription) = &config.input_audio_transcription {
        obj.insert(
            "input_audio_transcription".to_string(),
            json!(transcription),
        );
    }
    if let Some(noise_reduction) = &config.input_audio_noise_reduction {
        obj.insert(
            "input_audio_noise_reduction".to_string(),
            json!({ "type": noise_reduction }),
        );
    }
    payload
}

/// Closed set of inbound event kinds the AI peer emits (§4.5).
#[derive(Debug, Clone)]
pub enum AiInbound {
    SessionCreated,
    SessionUpdated,
    InputAudioBufferSpeechStarted,
    InputAudioBufferSpeechStopped,
    InputAudioTranscriptionCompleted { transcript: String },
    ResponseCreated,
    ResponseOutputAudioDelta { audio_b64: String },
    ResponseOutputAudioDone,
    ResponseOutputAudioTranscriptDelta { delta: String },
    ResponseOutputAudioTranscriptDone { transcript: String },
    ResponseDone { usage: Option<Value>, finish_reason: Option<String> },
    ResponseCancelled,
    RateLimitsUpdated,
    /// `fatal` is a best-effort read of the payload; see DESIGN.md for the
    /// default taken when the wire doesn't say (§9's open questions applied
    /// to a field the spec leaves unspecified for inbound `error`).
    Error { fatal: bool, message: String },
    /// Anything outside the closed set above. The raw `type` string is kept
    /// so it can be logged/recorded without being acted upon.
    Unknown { raw_type: String },
}

/// Parses a raw inbound JSON message into the closed [`AiInbound`] set.
pub fn parse_inbound(raw: &Value) -> AiInbound {
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "session.created" => AiInbound::SessionCreated,
        "session.updated" => AiInbound::SessionUpdated,
        "input_audio_buffer.speech_started" => AiInbound::InputAudioBufferSpeechStarted,
        "input_audio_buffer.speech_stopped" => AiInbound::InputAudioBufferSpeechStopped,
        "conversation.item.input_audio_transcription.completed" => {
            AiInbound::InputAudioTranscriptionCompleted {
                transcript: raw
                    .get("transcript")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        "response.created" => AiInbound::ResponseCreated,
        "response.output_audio.delta" => AiInbound::ResponseOutputAudioDelta {
            audio_b64: raw
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "response.output_audio.done" => AiInbound::ResponseOutputAudioDone,
        "response.output_audio_transcript.delta" => AiInbound::ResponseOutputAudioTranscriptDelta {
            delta: raw
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "response.output_audio_transcript.done" => AiInbound::ResponseOutputAudioTranscriptDone {
            transcript: raw
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "response.done" => AiInbound::ResponseDone {
            usage: raw.get("response").and_then(|r| r.get("usage")).cloned(),
            finish_reason: raw
                .get("response")
                .and_then(|r| r.get("status"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "response.cancelled" => AiInbound::ResponseCancelled,
        "rate_limits.updated" => AiInbound::RateLimitsUpdated,
        "error" => {
            let error_obj = raw.get("error").unwrap_or(raw);
            AiInbound::Error {
                // No field in the documented contract marks recoverability;
                // default to fatal so a session never hangs in limbo on an
                // AI-peer error it doesn't recognise (see DESIGN.md).
                fatal: error_obj
                    .get("recoverable")
                    .and_then(Value::as_bool)
                    .map(|recoverable| !recoverable)
                    .unwrap_or(true),
                message: error_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown AI peer error")
                    .to_string(),
            }
        }
        other => AiInbound::Unknown {
            raw_type: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::config::{MaxOutputTokens, TurnDetection};

    #[test]
    fn session_update_carries_fixed_fields() {
        let config = SessionConfig::default();
        let msg = AiOutbound::SessionUpdate(config).to_json();
        assert_eq!(msg["type"], "session.update");
        assert_eq!(msg["session"]["modalities"], json!(["audio", "text"]));
        assert_eq!(msg["session"]["input_audio_format"], "pcm16");
        assert_eq!(msg["session"]["output_audio_format"], "pcm16");
    }

    #[test]
    fn session_update_omits_voice_speed_when_default() {
        let config = SessionConfig::default();
        let msg = AiOutbound::SessionUpdate(config).to_json();
        assert!(msg["session"].get("voice_speed").is_none());
    }

    #[test]
    fn session_update_includes_voice_speed_when_set() {
        let config = SessionConfig {
            voice_speed: Some(1.3),
            ..SessionConfig::default()
        };
        let msg = AiOutbound::SessionUpdate(config).to_json();
        assert_eq!(msg["session"]["voice_speed"], 1.3);
    }

    #[test]
    fn session_update_includes_infinite_sentinel() {
        let config = SessionConfig {
            max_output_tokens: Some(MaxOutputTokens::Infinite),
            ..SessionConfig::default()
        };
        let msg = AiOutbound::SessionUpdate(config).to_json();
        assert_eq!(msg["session"]["max_output_tokens"], "infinite");
    }

    #[test]
    fn conversation_item_create_shapes_text_message() {
        let msg = AiOutbound::ConversationItemCreate {
            role: ConversationRole::User,
            text: "Hello".to_string(),
        }
        .to_json();
        assert_eq!(msg["type"], "conversation.item.create");
        assert_eq!(msg["item"]["role"], "user");
        assert_eq!(msg["item"]["content"][0]["text"], "Hello");
    }

    #[test]
    fn parse_inbound_recognises_speech_started() {
        let raw = json!({ "type": "input_audio_buffer.speech_started" });
        assert!(matches!(
            parse_inbound(&raw),
            AiInbound::InputAudioBufferSpeechStarted
        ));
    }

    #[test]
    fn parse_inbound_extracts_audio_delta() {
        let raw = json!({ "type": "response.output_audio.delta", "delta": "abc123==" });
        match parse_inbound(&raw) {
            AiInbound::ResponseOutputAudioDelta { audio_b64 } => assert_eq!(audio_b64, "abc123=="),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_inbound_falls_back_to_unknown() {
        let raw = json!({ "type": "some.future.event" });
        match parse_inbound(&raw) {
            AiInbound::Unknown { raw_type } => assert_eq!(raw_type, "some.future.event"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_inbound_error_defaults_fatal() {
        let raw = json!({ "type": "error", "error": { "message": "boom" } });
        match parse_inbound(&raw) {
            AiInbound::Error { fatal, message } => {
                assert!(fatal);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_inbound_error_respects_recoverable_flag() {
        let raw = json!({ "type": "error", "error": { "message": "retry me", "recoverable": true } });
        match parse_inbound(&raw) {
            AiInbound::Error { fatal, .. } => assert!(!fatal),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn server_vad_turn_detection_serialises_with_tag() {
        let turn_detection = TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            idle_timeout_ms: None,
            create_response: true,
            interrupt_response: true,
        };
        let config = SessionConfig {
            turn_detection,
            ..SessionConfig::default()
        };
        let msg = AiOutbound::SessionUpdate(config).to_json();
        assert_eq!(msg["session"]["turn_detection"]["type"], "server_vad");
        assert!(msg["session"]["turn_detection"]
            .get("idle_timeout_ms")
            .is_none());
    }
}
