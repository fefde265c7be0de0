// Configuration database operations

use super::{current_timestamp_millis, db_error, Database};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Orchestrator configuration stored in the single `config` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbOfflineConfig {
    pub idle_timeout_secs: u64,
    pub activity_throttle_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub two_step_enabled: bool,
    pub default_model: Option<String>,
    pub asr_model: Option<String>,
}

impl Default for DbOfflineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            activity_throttle_ms: 10_000,
            temperature: 0.3,
            max_tokens: 2048,
            presence_penalty: 0.1,
            frequency_penalty: 0.1,
            two_step_enabled: false,
            default_model: None,
            asr_model: None,
        }
    }
}

impl Database {
    /// Load configuration, falling back to defaults when no row was saved yet
    pub fn load_config(&self) -> DbOfflineConfig {
        let defaults = DbOfflineConfig::default();
        let conn = self.connection();
        let result = conn.query_row(
            "SELECT idle_timeout_secs, activity_throttle_ms, temperature, max_tokens,
                    presence_penalty, frequency_penalty, two_step_enabled,
                    default_model, asr_model
             FROM config WHERE id = 1",
            [],
            |row| {
                Ok(DbOfflineConfig {
                    idle_timeout_secs: row
                        .get::<_, Option<u64>>(0)?
                        .unwrap_or(defaults.idle_timeout_secs),
                    activity_throttle_ms: row
                        .get::<_, Option<u64>>(1)?
                        .unwrap_or(defaults.activity_throttle_ms),
                    temperature: row.get::<_, Option<f64>>(2)?.unwrap_or(defaults.temperature),
                    max_tokens: row.get::<_, Option<u32>>(3)?.unwrap_or(defaults.max_tokens),
                    presence_penalty: row
                        .get::<_, Option<f64>>(4)?
                        .unwrap_or(defaults.presence_penalty),
                    frequency_penalty: row
                        .get::<_, Option<f64>>(5)?
                        .unwrap_or(defaults.frequency_penalty),
                    two_step_enabled: row.get::<_, Option<i32>>(6)?.unwrap_or(0) != 0,
                    default_model: row.get(7)?,
                    asr_model: row.get(8)?,
                })
            },
        );

        match result {
            Ok(config) => config,
            Err(rusqlite::Error::QueryReturnedNoRows) => defaults,
            Err(e) => {
                log::warn!("[DB] Failed to read config, using defaults: {e}");
                defaults
            }
        }
    }

    /// Save configuration to database
    pub fn save_config(&self, config: &DbOfflineConfig) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "INSERT OR REPLACE INTO config
             (id, idle_timeout_secs, activity_throttle_ms, temperature, max_tokens,
              presence_penalty, frequency_penalty, two_step_enabled,
              default_model, asr_model, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                config.idle_timeout_secs as i64,
                config.activity_throttle_ms as i64,
                config.temperature,
                config.max_tokens,
                config.presence_penalty,
                config.frequency_penalty,
                config.two_step_enabled as i32,
                config.default_model,
                config.asr_model,
                current_timestamp_millis(),
            ],
        )
        .map_err(db_error("save config"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn create_test_db() -> Arc<Database> {
        Arc::new(Database::new(":memory:").unwrap())
    }

    #[test]
    fn test_load_default_config() {
        let db = create_test_db();
        let config = db.load_config();

        assert_eq!(config, DbOfflineConfig::default());
        assert_eq!(config.idle_timeout_secs, 300);
        assert_eq!(config.activity_throttle_ms, 10_000);
        assert!(!config.two_step_enabled);
    }

    #[test]
    fn test_save_and_load_config() {
        let db = create_test_db();

        let config = DbOfflineConfig {
            idle_timeout_secs: 60,
            activity_throttle_ms: 500,
            temperature: 0.5,
            max_tokens: 512,
            presence_penalty: 0.0,
            frequency_penalty: 0.2,
            two_step_enabled: true,
            default_model: Some("Qwen2.5-3B-Instruct-q4f16_1-MLC".to_string()),
            asr_model: Some("Xenova/whisper-base".to_string()),
        };
        db.save_config(&config).unwrap();

        assert_eq!(db.load_config(), config);
    }

    #[test]
    fn test_save_config_overwrites_single_row() {
        let db = create_test_db();
        db.save_config(&DbOfflineConfig::default()).unwrap();

        let mut config = DbOfflineConfig::default();
        config.max_tokens = 128;
        db.save_config(&config).unwrap();

        let rows: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(db.load_config().max_tokens, 128);
    }
}
