//! Inbound/outbound telephony WebSocket framing and the back-pressured send
//! mailbox (§4.6, §6.1).

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol_constants::{TELEPHONY_BACKPRESSURE_HWM_MS, TELEPHONY_FRAME_MS};

/// `start.mediaFormat`, echoed back verbatim from the provider (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Closed set of inbound telephony message kinds (§4.6).
#[derive(Debug, Clone)]
pub enum TelephonyInbound {
    Connected {
        protocol: String,
    },
    Start {
        call_id: String,
        stream_id: String,
        custom_parameters: Option<Value>,
        media_format: Option<MediaFormat>,
    },
    Media {
        payload_b64: String,
        timestamp_ms: Option<u64>,
        track: Option<String>,
    },
    Mark {
        name: String,
    },
    Stop,
    /// A syntactically valid frame with a `type` outside the documented set.
    Unknown { raw_type: String },
}

/// Parses a raw inbound telephony JSON frame.
pub fn parse_inbound(raw: &Value) -> TelephonyInbound {
    let kind = raw.get("event").or_else(|| raw.get("type")).and_then(Value::as_str).unwrap_or("");
    match kind {
        "connected" => TelephonyInbound::Connected {
            protocol: raw
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "start" => {
            let start = raw.get("start").unwrap_or(raw);
            TelephonyInbound::Start {
                call_id: start
                    .get("callId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                stream_id: start
                    .get("streamId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                custom_parameters: start.get("customParameters").cloned(),
                media_format: start
                    .get("mediaFormat")
                    .and_then(|mf| serde_json::from_value(mf.clone()).ok()),
            }
        }
        "media" => {
            let media = raw.get("media").unwrap_or(raw);
            TelephonyInbound::Media {
                payload_b64: media
                    .get("payload")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                timestamp_ms: media.get("timestamp").and_then(Value::as_str).and_then(|s| s.parse().ok()),
                track: media.get("track").and_then(Value::as_str).map(str::to_string),
            }
        }
        "mark" => TelephonyInbound::Mark {
            name: raw
                .get("mark")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "stop" => TelephonyInbound::Stop,
        other => TelephonyInbound::Unknown {
            raw_type: other.to_string(),
        },
    }
}

/// Closed set of outbound telephony message kinds (§4.6).
#[derive(Debug, Clone)]
pub enum TelephonyOutbound {
    Media { stream_id: String, payload_b64: String },
    Mark { stream_id: String, name: String },
    Clear { stream_id: String },
}

impl TelephonyOutbound {
    pub fn to_json(&self) -> Value {
        match self {
            TelephonyOutbound::Media { stream_id, payload_b64 } => serde_json::json!({
                "event": "media",
                "streamSid": stream_id,
                "media": { "payload": payload_b64 },
            }),
            TelephonyOutbound::Mark { stream_id, name } => serde_json::json!({
                "event": "mark",
                "streamSid": stream_id,
                "mark": { "name": name },
            }),
            TelephonyOutbound::Clear { stream_id } => serde_json::json!({
                "event": "clear",
                "streamSid": stream_id,
            }),
        }
    }
}

/// Bounded outbound mailbox for one telephony connection (§5).
///
/// Exactly one task drains this mailbox, so writes to the WebSocket are
/// never interleaved. When the queue's buffered audio exceeds the
/// configured high-water mark, the oldest entries are dropped rather than
/// letting the AI event loop block on a slow telephony peer (§4.6).
pub struct TelephonyMailbox {
    queue: Mutex<VecDeque<TelephonyOutbound>>,
    high_water_frames: usize,
}

impl TelephonyMailbox {
    pub fn new(high_water_ms: u64) -> Self {
        let high_water_frames = (high_water_ms / TELEPHONY_FRAME_MS as u64).max(1) as usize;
        Self {
            queue: Mutex::new(VecDeque::new()),
            high_water_frames,
        }
    }

    pub fn with_default_high_water() -> Self {
        Self::new(TELEPHONY_BACKPRESSURE_HWM_MS as u64)
    }

    /// Pushes a message, dropping the oldest audio frame if the mailbox is
    /// over its high-water mark. Returns `true` if nothing was dropped.
    pub fn push(&self, message: TelephonyOutbound) -> bool {
        let mut queue = self.queue.lock();
        queue.push_back(message);
        if queue.len() > self.high_water_frames {
            queue.pop_front();
            return false;
        }
        true
    }

    pub fn pop(&self) -> Option<TelephonyOutbound> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drains everything currently queued, in order.
    pub fn drain_all(&self) -> Vec<TelephonyOutbound> {
        self.queue.lock().drain(..).collect()
    }

    /// Drops every queued audio/mark message, used on barge-in and on
    /// `response.cancelled` (§4.5, §4.6) — the caller still sends the
    /// provider-facing `clear` frame itself after calling this.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_inbound_start_binds_call_and_stream_ids() {
        let raw = json!({
            "event": "start",
            "start": { "callId": "CA1", "streamId": "MZ1" },
        });
        match parse_inbound(&raw) {
            TelephonyInbound::Start { call_id, stream_id, .. } => {
                assert_eq!(call_id, "CA1");
                assert_eq!(stream_id, "MZ1");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_inbound_media_extracts_payload() {
        let raw = json!({
            "event": "media",
            "media": { "payload": "abcd", "timestamp": "1000" },
        });
        match parse_inbound(&raw) {
            TelephonyInbound::Media { payload_b64, timestamp_ms, .. } => {
                assert_eq!(payload_b64, "abcd");
                assert_eq!(timestamp_ms, Some(1000));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_inbound_unknown_preserves_raw_type() {
        let raw = json!({ "event": "future-frame" });
        match parse_inbound(&raw) {
            TelephonyInbound::Unknown { raw_type } => assert_eq!(raw_type, "future-frame"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn outbound_media_serialises_expected_shape() {
        let msg = TelephonyOutbound::Media {
            stream_id: "MZ1".to_string(),
            payload_b64: "xyz".to_string(),
        }
        .to_json();
        assert_eq!(msg["event"], "media");
        assert_eq!(msg["media"]["payload"], "xyz");
    }

    #[test]
    fn mailbox_drops_oldest_once_over_high_water_mark() {
        let mailbox = TelephonyMailbox::new(40); // 2 frames at 20ms each
        assert!(mailbox.push(TelephonyOutbound::Mark { stream_id: "s".into(), name: "1".into() }));
        assert!(mailbox.push(TelephonyOutbound::Mark { stream_id: "s".into(), name: "2".into() }));
        assert!(!mailbox.push(TelephonyOutbound::Mark { stream_id: "s".into(), name: "3".into() }));
        assert_eq!(mailbox.len(), 2);
        match mailbox.pop().unwrap() {
            TelephonyOutbound::Mark { name, .. } => assert_eq!(name, "2"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn mailbox_clear_drops_everything_queued() {
        let mailbox = TelephonyMailbox::with_default_high_water();
        mailbox.push(TelephonyOutbound::Clear { stream_id: "s".into() });
        mailbox.clear();
        assert!(mailbox.is_empty());
    }
}
