//! Observer/control WebSocket channel (§4.7, §6.3).
//!
//! One [`ObserverConnection`] per connected client. All dispatch logic is a
//! plain synchronous/async function over a [`SessionRegistry`] reference —
//! no socket handle required — so commands are testable the same way
//! [`crate::ai::react_to_event`] is.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::config::SessionConfig;
use crate::ai::protocol::{AiOutbound, ConversationRole};
use crate::error::BridgeError;
use crate::events::{Direction, EventKind};
use crate::model::CallSummary;
use crate::registry::SessionRegistry;
use crate::telephony::TelephonyOutbound;

/// Per-connection auth and subscription state.
#[derive(Debug, Default)]
pub struct ObserverConnection {
    pub device_id: Option<String>,
    pub authenticated: bool,
    pub subscriptions: Vec<String>,
}

impl ObserverConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self, call_id: &str) -> bool {
        self.subscriptions.iter().any(|s| s == call_id)
    }

    fn subscribe(&mut self, call_id: &str) {
        if !self.is_subscribed(call_id) {
            self.subscriptions.push(call_id.to_string());
        }
    }

    fn unsubscribe(&mut self, call_id: &str) {
        self.subscriptions.retain(|s| s != call_id);
    }
}

/// Closed set of observer commands (§4.7). `raw_type` is the wire `type`
/// string, kept so `UNKNOWN_TYPE` errors can echo it back.
#[derive(Debug, Clone)]
pub enum ObserverCommand {
    Auth { device_id: String, token: Option<String> },
    Subscribe { call_id: String },
    Unsubscribe { call_id: String },
    SessionUpdate { call_id: String, config: Value },
    CallInterrupt { call_id: String },
    CallTriggerResponse { call_id: String },
    CallSendText { call_id: String, text: String, role: ConversationRole },
    CallEnd { call_id: String, reason: Option<String> },
    GetSessions,
    GetSession { call_id: String },
    GetEvents { call_id: String },
    Ping,
    Unknown { raw_type: String },
}

/// Parses one raw observer frame into the closed command set.
pub fn parse_command(raw: &Value) -> Result<ObserverCommand, BridgeError> {
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::InvalidPayload("missing type".to_string()))?;
    let payload = raw.get("payload").cloned().unwrap_or(json!({}));

    let call_id = || -> Result<String, BridgeError> {
        payload
            .get("callId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::InvalidPayload("missing callId".to_string()))
    };

    Ok(match kind {
        "auth" => ObserverCommand::Auth {
            device_id: payload
                .get("deviceId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BridgeError::InvalidPayload("missing deviceId".to_string()))?,
            token: payload.get("token").and_then(Value::as_str).map(str::to_string),
        },
        "subscribe" => ObserverCommand::Subscribe { call_id: call_id()? },
        "unsubscribe" => ObserverCommand::Unsubscribe { call_id: call_id()? },
        "session.update" => ObserverCommand::SessionUpdate {
            call_id: call_id()?,
            config: payload
                .get("config")
                .cloned()
                .ok_or_else(|| BridgeError::InvalidPayload("missing config".to_string()))?,
        },
        "call.interrupt" => ObserverCommand::CallInterrupt { call_id: call_id()? },
        "call.trigger_response" => ObserverCommand::CallTriggerResponse { call_id: call_id()? },
        "call.send_text" => ObserverCommand::CallSendText {
            call_id: call_id()?,
            text: payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BridgeError::InvalidPayload("missing text".to_string()))?,
            role: payload
                .get("role")
                .and_then(|r| serde_json::from_value(r.clone()).ok())
                .unwrap_or(ConversationRole::User),
        },
        "call.end" => ObserverCommand::CallEnd {
            call_id: call_id()?,
            reason: payload.get("reason").and_then(Value::as_str).map(str::to_string),
        },
        "get.sessions" => ObserverCommand::GetSessions,
        "get.session" => ObserverCommand::GetSession { call_id: call_id()? },
        "get.events" => ObserverCommand::GetEvents { call_id: call_id()? },
        "ping" => ObserverCommand::Ping,
        other => ObserverCommand::Unknown { raw_type: other.to_string() },
    })
}

/// A reply frame, shaped `{ type, timestamp, callSid, data }` for
/// server-pushed frames (§6.3) or `{ type: "error", payload }` for failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ObserverReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: u64,
    #[serde(rename = "callSid", skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    pub data: Value,
}

impl ObserverReply {
    pub fn new(kind: impl Into<String>, call_sid: Option<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: crate::utils::now_millis(),
            call_sid,
            data,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new("error", None, json!({ "code": code, "message": message.into() }))
    }
}

/// Dispatches one authenticated-or-auth command against the registry,
/// mutating `conn`'s auth/subscription state and returning the reply frames
/// to send back (subscribe can yield several: a snapshot plus replayed
/// events).
pub async fn dispatch(
    registry: &SessionRegistry,
    conn: &mut ObserverConnection,
    command: ObserverCommand,
) -> Vec<ObserverReply> {
    if !conn.authenticated {
        return match command {
            ObserverCommand::Auth { device_id, token: _ } => {
                conn.device_id = Some(device_id);
                conn.authenticated = true;
                vec![ObserverReply::new("auth.ok", None, json!({}))]
            }
            _ => vec![ObserverReply::error(BridgeError::AuthFailed.code(), "authenticate first")],
        };
    }

    match command {
        ObserverCommand::Auth { .. } => {
            vec![ObserverReply::new("auth.ok", None, json!({}))]
        }
        ObserverCommand::Subscribe { call_id } => {
            conn.subscribe(&call_id);
            let mut replies = vec![ObserverReply::new(
                "subscribe.ok",
                Some(call_id.clone()),
                json!({ "callId": call_id }),
            )];
            if let Some(session) = registry.get(&call_id) {
                replies.push(ObserverReply::new(
                    "session.snapshot",
                    Some(call_id.clone()),
                    serde_json::to_value(session.summary()).unwrap_or(json!({})),
                ));
                for event in session.event_log.replay() {
                    replies.push(ObserverReply::new(
                        "event",
                        Some(call_id.clone()),
                        serde_json::to_value(&event).unwrap_or(json!({})),
                    ));
                }
            }
            replies
        }
        ObserverCommand::Unsubscribe { call_id } => {
            conn.unsubscribe(&call_id);
            vec![ObserverReply::new("unsubscribe.ok", Some(call_id.clone()), json!({ "callId": call_id }))]
        }
        ObserverCommand::SessionUpdate { call_id, config } => {
            match with_session(registry, &call_id) {
                Ok(session) => match serde_json::from_value::<SessionConfig>(config) {
                    Ok(mut new_config) => match new_config.validate_and_clamp() {
                        Ok(()) => {
                            session.set_config(new_config.clone());
                            session.send_to_ai(AiOutbound::SessionUpdate(new_config));
                            vec![ObserverReply::new("session.update.ok", Some(call_id), json!({}))]
                        }
                        Err(err) => vec![error_reply(&err)],
                    },
                    Err(err) => vec![ObserverReply::error(
                        "INVALID_PAYLOAD",
                        format!("malformed config: {err}"),
                    )],
                },
                Err(err) => vec![error_reply(&err)],
            }
        }
        ObserverCommand::CallInterrupt { call_id } => match with_session(registry, &call_id) {
            Ok(session) => {
                session.send_to_ai(AiOutbound::ResponseCancel);
                if let Some(stream_id) = session.telephony_stream_id() {
                    if let Some(mailbox) = session.telephony_mailbox() {
                        mailbox.clear();
                    }
                    session.send_to_telephony(TelephonyOutbound::Clear { stream_id });
                }
                session.set_assistant_speaking(false);
                session
                    .event_log
                    .record(EventKind::ResponseCancelled, Direction::Outgoing, json!({ "reason": "observer" }));
                vec![ObserverReply::new("call.interrupt.ok", Some(call_id), json!({}))]
            }
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::CallTriggerResponse { call_id } => match with_session(registry, &call_id) {
            Ok(session) => {
                session.send_to_ai(AiOutbound::ResponseCreate);
                vec![ObserverReply::new("call.trigger_response.ok", Some(call_id), json!({}))]
            }
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::CallSendText { call_id, text, role } => match with_session(registry, &call_id) {
            Ok(session) => {
                session.send_to_ai(AiOutbound::ConversationItemCreate { role, text });
                vec![ObserverReply::new("call.send_text.ok", Some(call_id), json!({}))]
            }
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::CallEnd { call_id, reason } => match with_session(registry, &call_id) {
            Ok(session) => {
                session.event_log.record(
                    EventKind::CallDisconnected,
                    Direction::Outgoing,
                    json!({ "reason": reason }),
                );
                session.cancel_token.cancel();
                vec![ObserverReply::new("call.end.ok", Some(call_id), json!({}))]
            }
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::GetSessions => {
            let summaries: Vec<CallSummary> = registry.list_summaries();
            vec![ObserverReply::new(
                "get.sessions.ok",
                None,
                json!({ "sessions": summaries }),
            )]
        }
        ObserverCommand::GetSession { call_id } => match with_session(registry, &call_id) {
            Ok(session) => vec![ObserverReply::new(
                "get.session.ok",
                Some(call_id),
                serde_json::to_value(session.summary()).unwrap_or(json!({})),
            )],
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::GetEvents { call_id } => match with_session(registry, &call_id) {
            Ok(session) => vec![ObserverReply::new(
                "get.events.ok",
                Some(call_id),
                json!({ "events": session.event_log.replay() }),
            )],
            Err(err) => vec![error_reply(&err)],
        },
        ObserverCommand::Ping => vec![ObserverReply::new("pong", None, json!({}))],
        ObserverCommand::Unknown { raw_type } => {
            vec![ObserverReply::error(
                BridgeError::UnknownType(raw_type.clone()).code(),
                format!("unknown command type: {raw_type}"),
            )]
        }
    }
}

fn with_session(
    registry: &SessionRegistry,
    call_id: &str,
) -> Result<std::sync::Arc<crate::model::CallSession>, BridgeError> {
    registry
        .get(call_id)
        .ok_or_else(|| BridgeError::SessionNotFound(call_id.to_string()))
}

fn error_reply(err: &BridgeError) -> ObserverReply {
    ObserverReply::error(err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn commands_before_auth_are_rejected() {
        let registry = SessionRegistry::new();
        let mut conn = ObserverConnection::new();
        let replies = dispatch(&registry, &mut conn, ObserverCommand::Ping).await;
        assert_eq!(replies[0].kind, "error");
        assert_eq!(replies[0].data["code"], "AUTH_FAILED");
    }

    #[tokio::test]
    async fn auth_then_ping_succeeds() {
        let registry = SessionRegistry::new();
        let mut conn = ObserverConnection::new();
        dispatch(
            &registry,
            &mut conn,
            ObserverCommand::Auth { device_id: "dev1".to_string(), token: None },
        )
        .await;
        assert!(conn.authenticated);
        let replies = dispatch(&registry, &mut conn, ObserverCommand::Ping).await;
        assert_eq!(replies[0].kind, "pong");
    }

    #[tokio::test]
    async fn subscribe_to_missing_session_still_tracks_subscription() {
        let registry = SessionRegistry::new();
        let mut conn = ObserverConnection::new();
        conn.authenticated = true;
        let replies = dispatch(&registry, &mut conn, ObserverCommand::Subscribe { call_id: "CA1".to_string() }).await;
        assert_eq!(replies.len(), 1);
        assert!(conn.is_subscribed("CA1"));
    }

    #[tokio::test]
    async fn unknown_command_type_is_rejected() {
        let raw = json!({ "type": "call.levitate" });
        let command = parse_command(&raw).unwrap();
        let registry = SessionRegistry::new();
        let mut conn = ObserverConnection::new();
        conn.authenticated = true;
        let replies = dispatch(&registry, &mut conn, command).await;
        assert_eq!(replies[0].data["code"], "UNKNOWN_TYPE");
    }

    #[tokio::test]
    async fn get_session_on_missing_call_returns_session_not_found() {
        let registry = SessionRegistry::new();
        let mut conn = ObserverConnection::new();
        conn.authenticated = true;
        let replies = dispatch(&registry, &mut conn, ObserverCommand::GetSession { call_id: "nope".to_string() }).await;
        assert_eq!(replies[0].data["code"], "SESSION_NOT_FOUND");
    }

    #[test]
    fn parse_command_requires_call_id_for_subscribe() {
        let raw = json!({ "type": "subscribe", "payload": {} });
        assert!(parse_command(&raw).is_err());
    }
}
