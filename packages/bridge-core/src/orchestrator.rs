//! Wires the telephony peer, the AI peer and persistence into a call's full
//! lifecycle (§4.1–§4.4): session creation on `start`, audio ingest and
//! frame-buffer flush on `media`, and teardown with a final mix-down and
//! grace period on `stop`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::ai::config::SessionConfig;
use crate::ai::protocol::AiOutbound;
use crate::ai::run_ai_peer;
use crate::audio::{mulaw_to_pcm24k, wav};
use crate::context::BridgeContext;
use crate::events::{Direction, EventKind, EventLog};
use crate::model::{CallDirection, CallSession, CallState};
use crate::persistence::{CallOutcome, CallSessionRow, RecordingRow};
use crate::protocol_constants::FRAME_BUFFER_TICK_MS;
use crate::recorder::{Recorder, RecorderOutcome};
use crate::telephony::TelephonyMailbox;

/// Creates (or rejoins) the session for a telephony `start` frame and, on
/// first bind, spawns its AI peer and periodic background tasks (§4.1).
pub async fn handle_start(
    ctx: &BridgeContext,
    call_id: &str,
    stream_id: &str,
    peer_number: &str,
) -> Arc<CallSession> {
    let recording_path = PathBuf::from(&ctx.config.recording_root).join(format!("{call_id}.wav"));
    let recorder = Recorder::new(recording_path);
    let event_log = EventLog::new(
        call_id,
        uuid::Uuid::new_v4().to_string(),
        Arc::clone(&ctx.persistence),
        ctx.config.persist_events,
        Arc::clone(&ctx.spawner),
    );

    let session = ctx.registry.get_or_create(
        call_id,
        CallDirection::Inbound,
        peer_number,
        SessionConfig::default(),
        event_log,
        recorder,
        ctx.config.frame_buffer_target_samples(),
        ctx.config.frame_buffer_target_ms,
        &ctx.cancel_token,
    );

    if !session.bind_telephony_stream_id(stream_id.to_string()) {
        return session;
    }

    session.set_telephony_mailbox(Arc::new(TelephonyMailbox::new(
        ctx.config.telephony_backpressure_high_water_ms,
    )));
    session.set_state_if_live(CallState::TelephonyConnected);
    session.event_log.record(
        EventKind::CallStarted,
        Direction::Incoming,
        json!({ "streamId": stream_id }),
    );

    let persistence = Arc::clone(&ctx.persistence);
    let row = CallSessionRow {
        id: session.id.clone(),
        call_id: session.call_id.clone(),
        direction: session.direction,
        peer_number: session.peer_number.clone(),
        created_at_ms: session.created_at_ms,
        state: session.state(),
    };
    ctx.spawner.spawn(async move {
        if let Err(err) = persistence.upsert_call_session(row).await {
            tracing::warn!(%err, "failed to persist call session start");
        }
    });

    spawn_session_tasks(ctx, Arc::clone(&session));
    session
}

/// Decodes an inbound telephony `media` frame, ingests it into the
/// recorder, and forwards a block to the AI peer once the frame buffer
/// reaches its target (§4.2).
pub fn handle_media(session: &CallSession, payload_b64: &str) {
    let Ok(mulaw_bytes) = BASE64.decode(payload_b64) else {
        session.event_log.record(
            EventKind::ProtocolWarn,
            Direction::Incoming,
            json!({ "reason": "invalid base64 telephony payload" }),
        );
        return;
    };
    let pcm24k = mulaw_to_pcm24k(&mulaw_bytes);
    session.recorder.ingest_user(&pcm24k);
    session.add_audio_ms(crate::protocol_constants::TELEPHONY_FRAME_MS);

    if let Some(block) = session.buffer_user_audio(&pcm24k) {
        forward_user_audio(session, block);
    }
}

/// Records a telephony `mark` frame (§4.1).
pub fn handle_mark(session: &CallSession, name: &str) {
    session
        .event_log
        .record(EventKind::Mark, Direction::Incoming, json!({ "name": name }));
}

/// Tears a session down on a telephony `stop` frame or transport close:
/// drains the frame buffer, stops the recorder, persists the recording and
/// the session's terminal state, then cancels the session's token (§4.3,
/// §4.9). The registry entry itself is removed by the caller after
/// `session_destroy_grace_secs` has elapsed, so a late in-flight AI event
/// still finds a session to record against.
pub async fn handle_stop(ctx: &BridgeContext, session: &Arc<CallSession>) {
    if let Some(leftover) = Some(session.drain_frame_buffer()).filter(|s| !s.is_empty()) {
        forward_user_audio(session, leftover);
    }

    let outcome = session.recorder.stop().await;
    let call_outcome = match session.state() {
        CallState::Error => CallOutcome::Failed,
        _ => CallOutcome::Completed,
    };

    session.set_state_if_live(CallState::Ended);
    session.event_log.record(
        EventKind::CallDisconnected,
        Direction::Incoming,
        json!({ "outcome": call_outcome }),
    );

    let duration_seconds = match &outcome {
        RecorderOutcome::Saved { duration_seconds, .. } => *duration_seconds,
        _ => session.elapsed_ms() as f64 / 1000.0,
    };

    if let RecorderOutcome::Saved { path, duration_seconds, bytes } = &outcome {
        let row = RecordingRow {
            recording_id: uuid::Uuid::new_v4().to_string(),
            call_id: session.call_id.clone(),
            path: path.display().to_string(),
            duration_seconds: *duration_seconds,
            bytes: *bytes,
        };
        if let Err(err) = ctx.persistence.insert_recording(row).await {
            tracing::warn!(call_id = %session.call_id, %err, "failed to persist recording");
        }
    }

    if let Err(err) = ctx
        .persistence
        .update_call_session_end(&session.call_id, duration_seconds, call_outcome)
        .await
    {
        tracing::warn!(call_id = %session.call_id, %err, "failed to persist call session end");
    }

    for fragment in session.transcripts() {
        if let Err(err) = ctx
            .persistence
            .append_transcript(
                &session.id,
                fragment.speaker,
                &fragment.text,
                fragment.relative_timestamp_ms,
            )
            .await
        {
            tracing::warn!(call_id = %session.call_id, %err, "failed to persist transcript fragment");
        }
    }

    session.cancel_token.cancel();
}

/// Removes a session from the registry after `session_destroy_grace_secs`,
/// giving any already-spawned task a window to observe cancellation and
/// exit cleanly before the session becomes unreachable by `call_id` (§4.9).
pub fn schedule_removal(ctx: &BridgeContext, call_id: String) {
    let registry = Arc::clone(&ctx.registry);
    let grace = Duration::from_secs(ctx.config.session_destroy_grace_secs);
    ctx.spawner.spawn(async move {
        tokio::time::sleep(grace).await;
        registry.remove(&call_id);
    });
}

fn spawn_session_tasks(ctx: &BridgeContext, session: Arc<CallSession>) {
    let ai_session = Arc::clone(&session);
    let config = ctx.config.clone();
    ctx.spawner.spawn(async move {
        run_ai_peer(ai_session, config).await;
    });

    let buffer_session = Arc::clone(&session);
    ctx.spawner.spawn(async move {
        frame_buffer_ticker(buffer_session).await;
    });

    let mix_session = Arc::clone(&session);
    ctx.spawner.spawn(async move {
        recorder_mixer(mix_session).await;
    });
}

/// Periodically forces a partial frame-buffer flush so caller audio never
/// sits unsent past the configured flush interval, even below the target
/// block size (§4.2's no-minimum-size resolution).
async fn frame_buffer_ticker(session: Arc<CallSession>) {
    let mut interval = tokio::time::interval(Duration::from_millis(FRAME_BUFFER_TICK_MS));
    loop {
        tokio::select! {
            _ = session.cancel_token.cancelled() => break,
            _ = interval.tick() => {
                if let Some(block) = session.tick_frame_buffer() {
                    forward_user_audio(&session, block);
                }
            }
        }
    }
}

/// Periodically mixes down whatever the recorder's two tracks have
/// accumulated, so a long call's recording grows incrementally rather than
/// holding everything in memory until `stop` (§4.3).
async fn recorder_mixer(session: Arc<CallSession>) {
    let mut interval = tokio::time::interval(Duration::from_millis(
        crate::protocol_constants::RECORDER_MIX_INTERVAL_MS,
    ));
    loop {
        tokio::select! {
            _ = session.cancel_token.cancelled() => break,
            _ = interval.tick() => {
                if session.recorder.threshold_reached() {
                    session.recorder.mix_cycle().await;
                }
            }
        }
    }
}

/// Encodes a flushed block of caller PCM16 samples and forwards it to the
/// AI peer's outbound mailbox (§4.2, §4.5).
fn forward_user_audio(session: &CallSession, samples: Vec<i16>) {
    let bytes = wav::samples_to_bytes(&samples);
    let audio_b64 = BASE64.encode(bytes);
    session.send_to_ai(AiOutbound::InputAudioBufferAppend { audio_b64 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NoopPersistenceSink;
    use crate::registry::SessionRegistry;
    use crate::runtime::TokioSpawner;
    use tokio_util::sync::CancellationToken;

    fn make_ctx() -> BridgeContext {
        BridgeContext {
            registry: Arc::new(SessionRegistry::new()),
            persistence: Arc::new(NoopPersistenceSink),
            config: crate::config::BridgeConfig {
                ai_endpoint_url: "wss://example.test/v1/realtime".to_string(),
                ai_bearer_token: "sk-test".to_string(),
                recording_root: std::env::temp_dir().display().to_string(),
                ..Default::default()
            },
            cancel_token: CancellationToken::new(),
            spawner: Arc::new(TokioSpawner::current()),
        }
    }

    #[tokio::test]
    async fn handle_start_binds_stream_id_and_registers_session() {
        let ctx = make_ctx();
        let session = handle_start(&ctx, "CA1", "MZ1", "+15551234567").await;
        assert_eq!(session.telephony_stream_id(), Some("MZ1".to_string()));
        assert_eq!(session.state(), CallState::TelephonyConnected);
        assert_eq!(ctx.registry.session_count(), 1);
        session.cancel_token.cancel();
    }

    #[tokio::test]
    async fn handle_start_is_idempotent_for_duplicate_start_frames() {
        let ctx = make_ctx();
        let first = handle_start(&ctx, "CA1", "MZ1", "+15551234567").await;
        let second = handle_start(&ctx, "CA1", "MZ2", "+15551234567").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.telephony_stream_id(), Some("MZ1".to_string()));
        first.cancel_token.cancel();
    }

    #[tokio::test]
    async fn handle_media_decodes_and_counts_audio_ms() {
        let ctx = make_ctx();
        let session = handle_start(&ctx, "CA1", "MZ1", "+15551234567").await;
        let mulaw_frame = vec![0xFFu8; 160];
        let payload = BASE64.encode(&mulaw_frame);
        handle_media(&session, &payload);
        assert_eq!(session.stats().total_audio_ms, 20);
        session.cancel_token.cancel();
    }

    #[tokio::test]
    async fn handle_stop_discards_a_too_short_recording_and_ends_session() {
        let ctx = make_ctx();
        let session = handle_start(&ctx, "CA1", "MZ1", "+15551234567").await;
        handle_stop(&ctx, &session).await;
        assert_eq!(session.state(), CallState::Ended);
        assert!(session.cancel_token.is_cancelled());
    }
}
