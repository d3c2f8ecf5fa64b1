//! WebSocket listeners for the three external peers (§6): the telephony
//! media stream, and the observer/control channel in its two documented
//! shapes. Built on `axum`, the same way the reference project's
//! `api::ws`/`api::http` modules wrap a service layer in thin handlers.
//!
//! The AI-peer WebSocket is a *client* connection dialled by
//! [`crate::ai::run_ai_peer`], not a listener, so it has no handler here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;

use crate::context::BridgeContext;
use crate::events::EventRecord;
use crate::model::CallSession;
use crate::observer::{dispatch, parse_command, ObserverConnection, ObserverReply};
use crate::orchestrator::{handle_mark, handle_media, handle_start, handle_stop, schedule_removal};
use crate::protocol_constants::{OBSERVER_EVENT_POLL_MS, OBSERVER_HEARTBEAT_INTERVAL_SECS};
use crate::telephony::{parse_inbound, TelephonyInbound};

/// Builds the bridge's router: the telephony media stream, the observer
/// channel's two documented paths, and a liveness probe.
pub fn router(ctx: Arc<BridgeContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/media-stream", get(telephony_ws_handler))
        .route("/ios-client", get(observer_primary_ws_handler))
        .route("/events/:call_id", get(observer_subscribe_ws_handler))
        .with_state(ctx)
}

async fn health_check(State(ctx): State<Arc<BridgeContext>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "activeSessions": ctx.registry.session_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────
// Telephony media WebSocket (§6.1)
// ─────────────────────────────────────────────────────────────────────────

async fn telephony_ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<BridgeContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_telephony_ws(socket, ctx))
}

/// Drives one telephony connection for the lifetime of a call: parses each
/// inbound frame, delegates to the orchestrator, and drains the session's
/// outbound mailbox back to the socket at the telephony frame cadence
/// (§4.6's back-pressured mailbox; one task drains it, never interleaved).
async fn handle_telephony_ws(socket: WebSocket, ctx: Arc<BridgeContext>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session: Option<Arc<CallSession>> = None;
    let mut call_id: Option<String> = None;

    let mut drain_interval =
        tokio::time::interval(Duration::from_millis(crate::protocol_constants::TELEPHONY_FRAME_MS));

    loop {
        tokio::select! {
            biased;

            _ = drain_interval.tick() => {
                if let Some(ref session) = session {
                    if let Some(mailbox) = session.telephony_mailbox() {
                        for message in mailbox.drain_all() {
                            if sender.send(Message::Text(message.to_json().to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(raw) = serde_json::from_str::<serde_json::Value>(&text) else {
                            tracing::warn!("malformed telephony frame, ignoring");
                            continue;
                        };
                        match parse_inbound(&raw) {
                            TelephonyInbound::Connected { protocol } => {
                                tracing::info!(protocol, "telephony peer connected");
                            }
                            TelephonyInbound::Start { call_id: id, stream_id, custom_parameters, .. } => {
                                let peer_number = custom_parameters
                                    .as_ref()
                                    .and_then(|p| p.get("from"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("unknown")
                                    .to_string();
                                let bound = handle_start(&ctx, &id, &stream_id, &peer_number).await;
                                session = Some(bound);
                                call_id = Some(id);
                            }
                            TelephonyInbound::Media { payload_b64, .. } => {
                                match &session {
                                    Some(session) => handle_media(session, &payload_b64),
                                    None => tracing::warn!("media frame arrived before start was bound"),
                                }
                            }
                            TelephonyInbound::Mark { name } => {
                                if let Some(ref session) = session {
                                    handle_mark(session, &name);
                                }
                            }
                            TelephonyInbound::Stop => break,
                            TelephonyInbound::Unknown { raw_type } => {
                                tracing::debug!(raw_type, "unrecognised telephony frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if let Some(session) = session {
        handle_stop(&ctx, &session).await;
        if let Some(call_id) = call_id {
            schedule_removal(&ctx, call_id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Observer / control WebSocket (§4.7, §6.3)
// ─────────────────────────────────────────────────────────────────────────

async fn observer_primary_ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<BridgeContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let device_id = params.get("device_id").cloned();
    ws.on_upgrade(move |socket| handle_observer_ws(socket, ctx, device_id, None))
}

async fn observer_subscribe_ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<BridgeContext>>,
    Path(call_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer_ws(socket, ctx, None, Some(call_id)))
}

/// One subscribed session's live event stream, lazily bound once the
/// session actually exists (§4.7: subscribing before a session exists
/// still tracks the subscription for future events).
struct SubscribedStream {
    call_id: String,
    rx: broadcast::Receiver<EventRecord>,
}

/// Drives one observer connection. `device_id_from_query` pre-fills the
/// `auth` step for `/ios-client?device_id=…`; `auto_subscribe_call_id`
/// synthesizes an immediate `auth` + `subscribe` for `/events/{callId}`,
/// matching §6.3's "subscribe-only" shape for that path.
async fn handle_observer_ws(
    socket: WebSocket,
    ctx: Arc<BridgeContext>,
    device_id_from_query: Option<String>,
    auto_subscribe_call_id: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = ObserverConnection::new();
    let mut streams: Vec<SubscribedStream> = Vec::new();

    // Both documented paths identify the device via query string rather
    // than requiring an explicit first `auth` frame; `/events/{callId}`
    // additionally auto-subscribes since it has no other way to name a call.
    if let Some(device_id) = device_id_from_query.clone().or_else(|| {
        auto_subscribe_call_id
            .as_ref()
            .map(|call_id| format!("events-subscriber-{call_id}"))
    }) {
        let replies = dispatch(
            &ctx.registry,
            &mut conn,
            crate::observer::ObserverCommand::Auth { device_id, token: None },
        )
        .await;
        if send_replies(&mut sender, replies).await.is_err() {
            return;
        }
    }

    if let Some(call_id) = &auto_subscribe_call_id {
        let replies = dispatch(
            &ctx.registry,
            &mut conn,
            crate::observer::ObserverCommand::Subscribe { call_id: call_id.clone() },
        )
        .await;
        if send_replies(&mut sender, replies).await.is_err() {
            return;
        }
    }

    let mut poll_interval = tokio::time::interval(Duration::from_millis(OBSERVER_EVENT_POLL_MS));
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(OBSERVER_HEARTBEAT_INTERVAL_SECS));

    loop {
        tokio::select! {
            biased;

            _ = ctx.cancel_token.cancelled() => break,

            _ = poll_interval.tick() => {
                reconcile_subscriptions(&ctx, &conn, &mut streams);
                if forward_new_events(&mut sender, &mut streams).await.is_err() {
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                let ping = ObserverReply::new("ping", None, json!({}));
                if send_replies(&mut sender, vec![ping]).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(raw) => match parse_command(&raw) {
                                Ok(command) => dispatch(&ctx.registry, &mut conn, command).await,
                                Err(err) => vec![ObserverReply::error(err.code(), err.to_string())],
                            },
                            Err(err) => vec![ObserverReply::error(
                                "INVALID_PAYLOAD",
                                format!("malformed frame: {err}"),
                            )],
                        };
                        if send_replies(&mut sender, replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Lazily binds a broadcast receiver for each subscribed `call_id` once its
/// session exists, so a subscription made before `start` still catches
/// every event from the moment the session is created.
fn reconcile_subscriptions(
    ctx: &BridgeContext,
    conn: &ObserverConnection,
    streams: &mut Vec<SubscribedStream>,
) {
    streams.retain(|s| conn.is_subscribed(&s.call_id));
    for call_id in &conn.subscriptions {
        if streams.iter().any(|s| &s.call_id == call_id) {
            continue;
        }
        if let Some(session) = ctx.registry.get(call_id) {
            streams.push(SubscribedStream {
                call_id: call_id.clone(),
                rx: session.event_log.subscribe(),
            });
        }
    }
}

async fn forward_new_events(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    streams: &mut [SubscribedStream],
) -> Result<(), ()> {
    for stream in streams.iter_mut() {
        loop {
            match stream.rx.try_recv() {
                Ok(event) => {
                    let reply = ObserverReply::new(
                        "event",
                        Some(stream.call_id.clone()),
                        serde_json::to_value(&event).unwrap_or(json!({})),
                    );
                    send_replies(sender, vec![reply]).await?;
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(call_id = %stream.call_id, skipped = n, "observer lagged behind event log");
                }
            }
        }
    }
    Ok(())
}

async fn send_replies(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    replies: Vec<ObserverReply>,
) -> Result<(), ()> {
    for reply in replies {
        let Ok(text) = serde_json::to_string(&reply) else { continue };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}
