//! Bridge-wide configuration and tunables.
//!
//! Loaded by the standalone server binary from an optional YAML file and
//! layered with environment-variable overrides (see `apps/bridge-server`),
//! then handed to [`crate::bootstrap::bootstrap_services`]. The core crate
//! only defines the data; loading lives in the binary, same split as the
//! reference project's `ServerConfig` (binary-side) vs `state::Config`
//! (core-side).

use serde::Deserialize;

use crate::protocol_constants::*;

/// Tunable, deployment-specific configuration for the voice bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the telephony/observer HTTP+WS listener binds to.
    pub bind_addr: String,

    /// Base URL of the AI realtime WebSocket endpoint.
    pub ai_endpoint_url: String,

    /// Bearer token sent when dialing the AI endpoint.
    pub ai_bearer_token: String,

    /// Opaque credential used to validate inbound telephony connections.
    /// The core never interprets this value; it is handed to the telephony
    /// peer adapter's authentication check as-is.
    pub telephony_auth_token: Option<String>,

    /// Filesystem root under which mixed-down recordings are written.
    pub recording_root: String,

    /// Whether individual events (beyond terminal summaries/transcripts)
    /// are handed to the persistence sink. See §4.4 / open question 3.
    pub persist_events: bool,

    /// High-water mark, in milliseconds of buffered audio, before the
    /// telephony send mailbox starts dropping the oldest chunks.
    pub telephony_backpressure_high_water_ms: u64,

    /// Frame buffer target block duration, milliseconds.
    pub frame_buffer_target_ms: u64,

    /// AI-peer connect deadline, seconds.
    pub ai_connect_timeout_secs: u64,

    /// Observer command soft deadline, seconds.
    pub observer_command_timeout_secs: u64,

    /// Session destroy grace period, seconds.
    pub session_destroy_grace_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            ai_endpoint_url: String::new(),
            ai_bearer_token: String::new(),
            telephony_auth_token: None,
            recording_root: "./recordings".to_string(),
            persist_events: true,
            telephony_backpressure_high_water_ms: TELEPHONY_BACKPRESSURE_HWM_MS,
            frame_buffer_target_ms: FRAME_BUFFER_FLUSH_INTERVAL_MS,
            ai_connect_timeout_secs: AI_CONNECT_TIMEOUT_SECS,
            observer_command_timeout_secs: OBSERVER_COMMAND_TIMEOUT_SECS,
            session_destroy_grace_secs: SESSION_DESTROY_GRACE_SECS,
        }
    }
}

impl BridgeConfig {
    /// Validates that required credentials are present.
    ///
    /// Called once at bootstrap so misconfiguration fails fast instead of
    /// surfacing as a confusing transport error on the first call.
    pub fn validate(&self) -> Result<(), crate::error::BridgeError> {
        if self.ai_endpoint_url.is_empty() {
            return Err(crate::error::BridgeError::MissingCredential(
                "ai_endpoint_url is required".to_string(),
            ));
        }
        if self.ai_bearer_token.is_empty() {
            return Err(crate::error::BridgeError::MissingCredential(
                "ai_bearer_token is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Target frame-buffer block size in samples, derived from the
    /// configured target duration at the AI sample rate.
    pub fn frame_buffer_target_samples(&self) -> usize {
        (AI_SAMPLE_RATE as u64 * self.frame_buffer_target_ms / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_ai_credentials() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn configured_credentials_pass_validation() {
        let config = BridgeConfig {
            ai_endpoint_url: "wss://example.test/v1/realtime".to_string(),
            ai_bearer_token: "sk-test".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn frame_buffer_target_samples_matches_default_constant() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.frame_buffer_target_samples(),
            FRAME_BUFFER_TARGET_SAMPLES
        );
    }
}
