//! Binary-side configuration loading: YAML file, layered with environment
//! variable overrides, converted into `bridge_core::BridgeConfig`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// On-disk configuration shape. Fields mirror `BridgeConfig` field-for-field
/// so `to_core_config` is a plain move; CLI flags in `main.rs` layer on top
/// of whatever this produces.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub bind_addr: String,
    pub ai_endpoint_url: String,
    pub ai_bearer_token: String,
    pub telephony_auth_token: Option<String>,
    pub recording_root: String,
    pub persist_events: bool,
    pub telephony_backpressure_high_water_ms: u64,
    pub frame_buffer_target_ms: u64,
    pub ai_connect_timeout_secs: u64,
    pub observer_command_timeout_secs: u64,
    pub session_destroy_grace_secs: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        let core = bridge_core::config::BridgeConfig::default();
        Self {
            bind_addr: core.bind_addr,
            ai_endpoint_url: core.ai_endpoint_url,
            ai_bearer_token: core.ai_bearer_token,
            telephony_auth_token: core.telephony_auth_token,
            recording_root: core.recording_root,
            persist_events: core.persist_events,
            telephony_backpressure_high_water_ms: core.telephony_backpressure_high_water_ms,
            frame_buffer_target_ms: core.frame_buffer_target_ms,
            ai_connect_timeout_secs: core.ai_connect_timeout_secs,
            observer_command_timeout_secs: core.observer_command_timeout_secs,
            session_destroy_grace_secs: core.session_destroy_grace_secs,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides (`BRIDGE_*`, per SPEC_FULL.md's configuration table).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BRIDGE_BIND_ADDR") {
            self.bind_addr = val;
        }
        if let Ok(val) = std::env::var("BRIDGE_AI_ENDPOINT_URL") {
            self.ai_endpoint_url = val;
        }
        if let Ok(val) = std::env::var("BRIDGE_AI_BEARER_TOKEN") {
            self.ai_bearer_token = val;
        }
        if let Ok(val) = std::env::var("BRIDGE_TELEPHONY_AUTH_TOKEN") {
            self.telephony_auth_token = Some(val);
        }
        if let Ok(val) = std::env::var("BRIDGE_RECORDING_ROOT") {
            self.recording_root = val;
        }
        if let Ok(val) = std::env::var("BRIDGE_PERSIST_EVENTS") {
            if let Ok(parsed) = val.parse() {
                self.persist_events = parsed;
            }
        }
        if let Ok(val) = std::env::var("BRIDGE_TELEPHONY_BACKPRESSURE_HIGH_WATER_MS") {
            if let Ok(parsed) = val.parse() {
                self.telephony_backpressure_high_water_ms = parsed;
            }
        }
        if let Ok(val) = std::env::var("BRIDGE_FRAME_BUFFER_TARGET_MS") {
            if let Ok(parsed) = val.parse() {
                self.frame_buffer_target_ms = parsed;
            }
        }
        if let Ok(val) = std::env::var("BRIDGE_AI_CONNECT_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                self.ai_connect_timeout_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("BRIDGE_OBSERVER_COMMAND_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                self.observer_command_timeout_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("BRIDGE_SESSION_DESTROY_GRACE_SECS") {
            if let Ok(parsed) = val.parse() {
                self.session_destroy_grace_secs = parsed;
            }
        }
    }

    pub fn to_core_config(&self) -> bridge_core::config::BridgeConfig {
        bridge_core::config::BridgeConfig {
            bind_addr: self.bind_addr.clone(),
            ai_endpoint_url: self.ai_endpoint_url.clone(),
            ai_bearer_token: self.ai_bearer_token.clone(),
            telephony_auth_token: self.telephony_auth_token.clone(),
            recording_root: self.recording_root.clone(),
            persist_events: self.persist_events,
            telephony_backpressure_high_water_ms: self.telephony_backpressure_high_water_ms,
            frame_buffer_target_ms: self.frame_buffer_target_ms,
            ai_connect_timeout_secs: self.ai_connect_timeout_secs,
            observer_command_timeout_secs: self.observer_command_timeout_secs,
            session_destroy_grace_secs: self.session_destroy_grace_secs,
        }
    }
}
