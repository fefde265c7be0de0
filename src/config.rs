use std::path::{Path, PathBuf};
use std::time::Duration;

use offline_db::DbOfflineConfig;
use offline_types::SamplingOptions;
use serde::Serialize;

use crate::idle::{ACTIVITY_THROTTLE, IDLE_TIMEOUT};

pub const DEFAULT_DB_PATH: &str = "assets/offline_translator.db";
pub const DEFAULT_MODELS_DIR: &str = "assets/models";
/// Subdirectory of the models directory holding speech models. Model ids
/// cannot start with `.`, so no translation model can land on it.
pub const SPEECH_CACHE_DIR: &str = ".speech";

pub fn speech_cache_dir(models_dir: &Path) -> PathBuf {
    models_dir.join(SPEECH_CACHE_DIR)
}

/// Runtime configuration of the translator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfflineConfig {
    pub idle_timeout: Duration,
    pub activity_throttle: Duration,
    pub sampling: SamplingOptions,
    pub two_step_enabled: bool,
    pub default_model: Option<String>,
    pub asr_model: Option<String>,
    /// Not persisted; where the bundled engine keeps model artifacts.
    pub models_dir: PathBuf,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT,
            activity_throttle: ACTIVITY_THROTTLE,
            sampling: SamplingOptions::default(),
            two_step_enabled: false,
            default_model: None,
            asr_model: None,
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
        }
    }
}

/// Convert the stored row into runtime configuration
pub fn db_config_to_offline_config(db_config: &DbOfflineConfig, models_dir: PathBuf) -> OfflineConfig {
    OfflineConfig {
        idle_timeout: Duration::from_secs(db_config.idle_timeout_secs),
        activity_throttle: Duration::from_millis(db_config.activity_throttle_ms),
        sampling: SamplingOptions {
            temperature: db_config.temperature as f32,
            max_tokens: db_config.max_tokens,
            presence_penalty: db_config.presence_penalty as f32,
            frequency_penalty: db_config.frequency_penalty as f32,
        },
        two_step_enabled: db_config.two_step_enabled,
        default_model: db_config.default_model.clone(),
        asr_model: db_config.asr_model.clone(),
        models_dir,
    }
}

/// Convert runtime configuration into the stored row
pub fn offline_config_to_db(config: &OfflineConfig) -> DbOfflineConfig {
    DbOfflineConfig {
        idle_timeout_secs: config.idle_timeout.as_secs(),
        activity_throttle_ms: config.activity_throttle.as_millis() as u64,
        temperature: f64::from(config.sampling.temperature),
        max_tokens: config.sampling.max_tokens,
        presence_penalty: f64::from(config.sampling.presence_penalty),
        frequency_penalty: f64::from(config.sampling.frequency_penalty),
        two_step_enabled: config.two_step_enabled,
        default_model: config.default_model.clone(),
        asr_model: config.asr_model.clone(),
    }
}

/// Keys accepted by [`OfflineConfig::set`].
pub const CONFIG_KEYS: &[&str] = &[
    "idle_timeout_secs",
    "activity_throttle_ms",
    "temperature",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
    "two_step_enabled",
    "default_model",
    "asr_model",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value for {key}: {value}"))
}

/// Empty string or "none" clears an optional setting.
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value.to_string())
    }
}

impl OfflineConfig {
    /// Update one setting from its textual form, validating the range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "idle_timeout_secs" => {
                let secs: u64 = parse(key, value)?;
                if secs == 0 {
                    return Err("idle_timeout_secs must be greater than 0".into());
                }
                self.idle_timeout = Duration::from_secs(secs);
            }
            "activity_throttle_ms" => {
                self.activity_throttle = Duration::from_millis(parse(key, value)?);
            }
            "temperature" => {
                let temperature: f32 = parse(key, value)?;
                if !(0.0..=2.0).contains(&temperature) {
                    return Err("temperature must be between 0.0 and 2.0".into());
                }
                self.sampling.temperature = temperature;
            }
            "max_tokens" => {
                let max_tokens: u32 = parse(key, value)?;
                if max_tokens == 0 {
                    return Err("max_tokens must be greater than 0".into());
                }
                self.sampling.max_tokens = max_tokens;
            }
            "presence_penalty" => {
                let penalty: f32 = parse(key, value)?;
                if !(-2.0..=2.0).contains(&penalty) {
                    return Err("presence_penalty must be between -2.0 and 2.0".into());
                }
                self.sampling.presence_penalty = penalty;
            }
            "frequency_penalty" => {
                let penalty: f32 = parse(key, value)?;
                if !(-2.0..=2.0).contains(&penalty) {
                    return Err("frequency_penalty must be between -2.0 and 2.0".into());
                }
                self.sampling.frequency_penalty = penalty;
            }
            "two_step_enabled" => self.two_step_enabled = parse(key, value)?,
            "default_model" => self.default_model = optional(value),
            "asr_model" => self.asr_model = optional(value),
            other => {
                return Err(format!(
                    "unknown config key '{other}' (expected one of: {})",
                    CONFIG_KEYS.join(", ")
                ))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_db::Database;

    #[test]
    fn test_defaults_match_stored_defaults() {
        let config = OfflineConfig::default();
        let stored = db_config_to_offline_config(&DbOfflineConfig::default(), config.models_dir.clone());
        assert_eq!(stored, config);
    }

    #[test]
    fn test_round_trip_through_database() {
        let db = Database::new(":memory:").unwrap();
        let mut config = OfflineConfig::default();
        config.set("idle_timeout_secs", "60").unwrap();
        config.set("two_step_enabled", "true").unwrap();
        config.set("default_model", "Qwen3-4B-q4f16_1-MLC").unwrap();
        db.save_config(&offline_config_to_db(&config)).unwrap();

        let loaded = db_config_to_offline_config(&db.load_config(), config.models_dir.clone());
        assert_eq!(loaded.idle_timeout, Duration::from_secs(60));
        assert!(loaded.two_step_enabled);
        assert_eq!(loaded.default_model.as_deref(), Some("Qwen3-4B-q4f16_1-MLC"));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = OfflineConfig::default();
        assert!(config.set("temperature", "3.5").is_err());
        assert!(config.set("max_tokens", "zero").is_err());
        assert!(config.set("idle_timeout_secs", "0").is_err());
        assert!(config.set("colour", "blue").is_err());
        assert_eq!(config, OfflineConfig::default());

        config.set("default_model", "none").unwrap();
        assert_eq!(config.default_model, None);
    }
}
