//! Session-configuration contract for the AI realtime peer (§4.5).
//!
//! `SessionConfig` is the caller-facing shape; [`SessionConfig::validate_and_clamp`]
//! applies the same bounds-clamping discipline the reference project's
//! `handle_handshake` uses for its streaming handshake before anything is
//! sent over the wire.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::{
    DEFAULT_INSTRUCTIONS, TEMPERATURE_RANGE, VAD_THRESHOLD_RANGE, VOICE_SPEED_RANGE,
};

/// Fixed named set of voices the AI peer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
    Coral,
    Sage,
    Verse,
}

impl Default for Voice {
    fn default() -> Self {
        Voice::Alloy
    }
}

/// `maxOutputTokens`: either a positive bound or the `"infinite"` sentinel.
///
/// Not `#[serde(untagged)]`: an untagged unit variant serializes to `null`
/// regardless of any `rename`, which would silently drop the `"infinite"`
/// sentinel the wire contract requires. Serialized/deserialized by hand
/// instead, against the literal number-or-`"infinite"` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOutputTokens {
    Limited(u32),
    Infinite,
}

impl Serialize for MaxOutputTokens {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxOutputTokens::Limited(tokens) => serializer.serialize_u32(*tokens),
            MaxOutputTokens::Infinite => serializer.serialize_str("infinite"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxOutputTokens {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(tokens) => Ok(MaxOutputTokens::Limited(tokens)),
            Raw::Text(text) if text == "infinite" => Ok(MaxOutputTokens::Infinite),
            Raw::Text(other) => Err(serde::de::Error::custom(format!(
                "unknown max_output_tokens sentinel: {other}"
            ))),
        }
    }
}

/// `inputAudioNoiseReduction.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoiseReduction {
    NearField,
    FarField,
    Off,
}

/// Turn-detection eagerness for the semantic-VAD variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    Low,
    Medium,
    High,
    Auto,
}

/// `turnDetection`: one of three variants (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f64,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        idle_timeout_ms: Option<u32>,
        create_response: bool,
        interrupt_response: bool,
    },
    SemanticVad {
        eagerness: Eagerness,
        create_response: bool,
        interrupt_response: bool,
    },
    Disabled,
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            idle_timeout_ms: None,
            create_response: true,
            interrupt_response: true,
        }
    }
}

impl TurnDetection {
    /// Whether speech detection on this turn-detection mode is allowed to
    /// cancel an in-flight assistant response (barge-in, §4.5).
    pub fn interrupt_response(&self) -> bool {
        match self {
            TurnDetection::ServerVad {
                interrupt_response, ..
            } => *interrupt_response,
            TurnDetection::SemanticVad {
                interrupt_response, ..
            } => *interrupt_response,
            TurnDetection::Disabled => false,
        }
    }
}

/// `inputAudioTranscription`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputAudioTranscription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-session AI configuration snapshot (§4.5, §3's `CallSession.config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub voice: Voice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_speed: Option<f64>,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<MaxOutputTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,
    #[serde(default)]
    pub turn_detection: TurnDetection,
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            voice_speed: None,
            instructions: default_instructions(),
            temperature: 0.8,
            max_output_tokens: None,
            input_audio_transcription: None,
            input_audio_noise_reduction: None,
            turn_detection: TurnDetection::default(),
        }
    }
}

impl SessionConfig {
    /// Clamps documented-bounded fields and rejects out-of-contract values
    /// that aren't simply clampable (§2.1's config-validation note).
    ///
    /// `voiceSpeed` is omitted from the wire message entirely when exactly
    /// `1.0` (§4.5); that's handled by [`Self::to_wire`], not here.
    pub fn validate_and_clamp(&mut self) -> BridgeResult<()> {
        if let Some(speed) = self.voice_speed {
            self.voice_speed = Some(speed.clamp(VOICE_SPEED_RANGE.0, VOICE_SPEED_RANGE.1));
        }
        self.temperature = self.temperature.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);

        if let TurnDetection::ServerVad { threshold, .. } = &mut self.turn_detection {
            *threshold = threshold.clamp(VAD_THRESHOLD_RANGE.0, VAD_THRESHOLD_RANGE.1);
        }

        if let Some(MaxOutputTokens::Limited(tokens)) = self.max_output_tokens {
            if tokens < 1 {
                return Err(BridgeError::InvalidRequest(
                    "maxOutputTokens must be >= 1 or \"infinite\"".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// `voiceSpeed` exactly `1.0` (the default) is omitted from the wire
    /// message rather than sent explicitly (§4.5).
    pub fn wire_voice_speed(&self) -> Option<f64> {
        self.voice_speed.filter(|&speed| (speed - 1.0).abs() > f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_voice_speed_to_range() {
        let mut config = SessionConfig {
            voice_speed: Some(5.0),
            ..SessionConfig::default()
        };
        config.validate_and_clamp().unwrap();
        assert_eq!(config.voice_speed, Some(VOICE_SPEED_RANGE.1));
    }

    #[test]
    fn clamps_temperature_to_range() {
        let mut config = SessionConfig {
            temperature: 3.0,
            ..SessionConfig::default()
        };
        config.validate_and_clamp().unwrap();
        assert_eq!(config.temperature, TEMPERATURE_RANGE.1);
    }

    #[test]
    fn clamps_server_vad_threshold() {
        let mut config = SessionConfig {
            turn_detection: TurnDetection::ServerVad {
                threshold: 0.01,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
                idle_timeout_ms: None,
                create_response: true,
                interrupt_response: true,
            },
            ..SessionConfig::default()
        };
        config.validate_and_clamp().unwrap();
        match config.turn_detection {
            TurnDetection::ServerVad { threshold, .. } => {
                assert_eq!(threshold, VAD_THRESHOLD_RANGE.0)
            }
            _ => panic!("expected server vad"),
        }
    }

    #[test]
    fn rejects_zero_max_output_tokens() {
        let mut config = SessionConfig {
            max_output_tokens: Some(MaxOutputTokens::Limited(0)),
            ..SessionConfig::default()
        };
        assert!(config.validate_and_clamp().is_err());
    }

    #[test]
    fn accepts_infinite_max_output_tokens() {
        let mut config = SessionConfig {
            max_output_tokens: Some(MaxOutputTokens::Infinite),
            ..SessionConfig::default()
        };
        assert!(config.validate_and_clamp().is_ok());
    }

    #[test]
    fn voice_speed_of_one_is_omitted_from_wire() {
        let config = SessionConfig {
            voice_speed: Some(1.0),
            ..SessionConfig::default()
        };
        assert_eq!(config.wire_voice_speed(), None);
    }

    #[test]
    fn voice_speed_other_than_one_is_sent() {
        let config = SessionConfig {
            voice_speed: Some(1.25),
            ..SessionConfig::default()
        };
        assert_eq!(config.wire_voice_speed(), Some(1.25));
    }

    #[test]
    fn disabled_turn_detection_never_interrupts() {
        assert!(!TurnDetection::Disabled.interrupt_response());
    }
}
