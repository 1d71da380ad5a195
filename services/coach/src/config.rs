//! Coach configuration, loaded from the environment (and `.env` when present).

use formflux_live::types::session::{Modality, DEFAULT_MODEL};
use formflux_live::types::Voice;
use std::env;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_POSE_INTERVAL_MS: u64 = 333;
pub const DEFAULT_IMAGE_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_TOOL_RESPONSE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: String,
    pub voice: Voice,
    pub response_modality: Modality,
    pub pose_interval: Duration,
    pub image_interval: Duration,
    pub tool_response_delay: Duration,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `GEMINI_API_KEY`: Secret key for the Gemini Live API. Required.
    /// *   `LIVE_MODEL`: (Optional) Model name. Defaults to the native audio dialog model.
    /// *   `LIVE_VOICE`: (Optional) Prebuilt voice. Defaults to "Aoede".
    /// *   `RESPONSE_MODALITY`: (Optional) "audio" or "text". Defaults to "audio".
    /// *   `POSE_INTERVAL_MS`, `IMAGE_INTERVAL_MS`: (Optional) Visual sampling periods.
    /// *   `TOOL_RESPONSE_DELAY_MS`: (Optional) Delay before tool responses are sent.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = lookup("LIVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let voice = match lookup("LIVE_VOICE") {
            Some(name) => name.parse::<Voice>().unwrap_or_else(|e| match e {}),
            None => Voice::Aoede,
        };

        let response_modality = match lookup("RESPONSE_MODALITY") {
            Some(value) => value
                .parse::<Modality>()
                .map_err(|e| ConfigError::InvalidValue("RESPONSE_MODALITY".to_string(), e))?,
            None => Modality::Audio,
        };

        let pose_interval = millis(&lookup, "POSE_INTERVAL_MS", DEFAULT_POSE_INTERVAL_MS)?;
        let image_interval = millis(&lookup, "IMAGE_INTERVAL_MS", DEFAULT_IMAGE_INTERVAL_MS)?;
        let tool_response_delay =
            millis(&lookup, "TOOL_RESPONSE_DELAY_MS", DEFAULT_TOOL_RESPONSE_DELAY_MS)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            gemini_api_key,
            model,
            voice,
            response_modality,
            pose_interval,
            image_interval,
            tool_response_delay,
            log_level,
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(Duration::from_millis(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("GEMINI_API_KEY", "secret")]).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.voice, Voice::Aoede);
        assert_eq!(config.response_modality, Modality::Audio);
        assert_eq!(config.pose_interval, Duration::from_millis(333));
        assert_eq!(config.image_interval, Duration::from_millis(2000));
        assert_eq!(config.tool_response_delay, Duration::from_millis(200));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(_))));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = load(&[
            ("GEMINI_API_KEY", "secret"),
            ("LIVE_VOICE", "Kore"),
            ("RESPONSE_MODALITY", "text"),
            ("POSE_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.voice, Voice::Kore);
        assert_eq!(config.response_modality, Modality::Text);
        assert_eq!(config.pose_interval, Duration::from_millis(250));

        let bad = load(&[("GEMINI_API_KEY", "secret"), ("IMAGE_INTERVAL_MS", "soon")]);
        assert!(matches!(bad, Err(ConfigError::InvalidValue(key, _)) if key == "IMAGE_INTERVAL_MS"));
    }
}
