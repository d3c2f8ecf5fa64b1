//! Fixed protocol and tuning constants for the voice bridge.
//!
//! Values that come straight from the wire protocols (sample rates, frame
//! sizes) are not configurable; values that are operational tuning knobs are
//! also exposed through [`crate::config::BridgeConfig`] with these as
//! defaults.

/// Telephony-side sample rate (µ-law), Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// AI-peer and recording sample rate (PCM16), Hz.
pub const AI_SAMPLE_RATE: u32 = 24_000;

/// Upsample/downsample ratio between the telephony and AI sample rates.
pub const RESAMPLE_RATIO: usize = (AI_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize;

/// Telephony `media` frames arrive roughly every 20 ms.
pub const TELEPHONY_FRAME_MS: u64 = 20;

/// Frame buffer target block size: 100 ms at 24 kHz mono.
pub const FRAME_BUFFER_TARGET_SAMPLES: usize = 2_400;

/// Frame buffer target flush interval.
pub const FRAME_BUFFER_FLUSH_INTERVAL_MS: u64 = 100;

/// Frame buffer periodic-tick interval (checks for a stale partial block).
pub const FRAME_BUFFER_TICK_MS: u64 = 50;

/// Recorder mix cycle threshold: 500 ms at 24 kHz mono.
pub const RECORDER_MIX_THRESHOLD_SAMPLES: usize = 12_000;

/// Recorder mix cycle time threshold.
pub const RECORDER_MIX_INTERVAL_MS: u64 = 500;

/// Recordings shorter than this are discarded on `stop()`.
pub const RECORDER_MIN_DURATION_SECS: f64 = 1.0;

/// Canonical RIFF/WAVE header size in bytes.
pub const WAV_HEADER_BYTES: usize = 44;

/// Bits per sample for the recording container.
pub const WAV_BITS_PER_SAMPLE: u16 = 16;

/// Channels for the recording container (mono).
pub const WAV_CHANNELS: u16 = 1;

/// Event log ring buffer cap; trimmed once this is reached.
pub const EVENT_LOG_CAP: usize = 1_000;

/// Event log trims down to this many most-recent events when the cap is hit.
pub const EVENT_LOG_TRIM_TO: usize = 500;

/// Observer `subscribe` replay window: most recent events sent on attach.
pub const OBSERVER_REPLAY_WINDOW: usize = 50;

/// AI-peer WebSocket connect deadline.
pub const AI_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Observer command soft deadline.
pub const OBSERVER_COMMAND_TIMEOUT_SECS: u64 = 5;

/// Session destroy grace period before forced peer close.
pub const SESSION_DESTROY_GRACE_SECS: u64 = 2;

/// Default telephony send-queue high-water mark, expressed in milliseconds
/// of buffered audio before the oldest chunks are dropped.
pub const TELEPHONY_BACKPRESSURE_HWM_MS: u64 = 2_000;

/// Observer connection idle heartbeat interval.
pub const OBSERVER_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// How often an observer connection polls its subscribed sessions' event
/// logs for new events to forward.
pub const OBSERVER_EVENT_POLL_MS: u64 = 50;

/// `voiceSpeed` valid range.
pub const VOICE_SPEED_RANGE: (f64, f64) = (0.5, 1.5);

/// `temperature` valid range.
pub const TEMPERATURE_RANGE: (f64, f64) = (0.6, 1.2);

/// Server-VAD `threshold` valid range.
pub const VAD_THRESHOLD_RANGE: (f64, f64) = (0.1, 0.9);

/// Default system prompt when the caller does not supply `instructions`.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_ratio_matches_sample_rates() {
        assert_eq!(TELEPHONY_SAMPLE_RATE as usize * RESAMPLE_RATIO, AI_SAMPLE_RATE as usize);
    }

    #[test]
    fn frame_buffer_target_is_100ms_at_24khz() {
        assert_eq!(
            FRAME_BUFFER_TARGET_SAMPLES,
            (AI_SAMPLE_RATE as u64 * FRAME_BUFFER_FLUSH_INTERVAL_MS / 1000) as usize
        );
    }
}
