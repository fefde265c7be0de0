// Database schema definitions for the offline translator

use super::db_error;
use rusqlite::Connection;

const CREATE_CACHED_MODELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cached_models (
    model_id TEXT PRIMARY KEY,
    cached_at INTEGER NOT NULL
)
"#;

const CREATE_CUSTOM_MODELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS custom_models (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    model_url TEXT NOT NULL,
    model_lib_url TEXT NOT NULL,
    added_at INTEGER NOT NULL
)
"#;

const CREATE_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    idle_timeout_secs INTEGER DEFAULT 300,
    activity_throttle_ms INTEGER DEFAULT 10000,
    temperature REAL DEFAULT 0.3,
    max_tokens INTEGER DEFAULT 2048,
    presence_penalty REAL DEFAULT 0.1,
    frequency_penalty REAL DEFAULT 0.1,
    two_step_enabled INTEGER DEFAULT 0,
    default_model TEXT,
    asr_model TEXT,
    updated_at INTEGER
)
"#;

/// Initialize the database schema
pub fn initialize(conn: &Connection) -> Result<(), String> {
    let statements = [
        ("cached_models", CREATE_CACHED_MODELS_TABLE),
        ("custom_models", CREATE_CUSTOM_MODELS_TABLE),
        ("config", CREATE_CONFIG_TABLE),
    ];

    for (name, sql) in statements.iter() {
        conn.execute(sql, [])
            .map_err(db_error(&format!("create {name}")))?;
    }

    Ok(())
}
