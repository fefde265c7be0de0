// SQLite persistence for the offline translator.
// Holds the cache ledger, the custom model registry and the single config row.

pub mod config;
pub mod custom_models;
pub mod ledger;
pub mod schema;

pub use config::DbOfflineConfig;
pub use ledger::CacheLedger;

use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Main database wrapper around a single guarded connection
pub struct Database {
    conn: Mutex<Connection>,
}

/// Shared database type for passing across async boundaries
pub type SharedDatabase = Arc<Database>;

/// Helper function to create standardized database error messages
///
/// Usage: `.map_err(db_error("add cached model"))?`
pub fn db_error(context: &str) -> impl Fn(rusqlite::Error) -> String + '_ {
    move |e| format!("Failed to {context}: {e}")
}

impl Database {
    /// Open (or create) the database and initialize schema.
    /// `":memory:"` gives a private in-memory database.
    pub fn new(db_path: &str) -> Result<Self, String> {
        let conn = Connection::open(db_path).map_err(db_error("open database"))?;
        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the connection (locked). A poisoned lock is recovered since every
    /// statement runs to completion or fails atomically inside SQLite.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_database_twice_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).unwrap();
            db.add_cached_model("Qwen3-4B-q4f16_1-MLC").unwrap();
        }

        let db = Database::new(path).unwrap();
        assert_eq!(
            db.cached_models().unwrap(),
            vec!["Qwen3-4B-q4f16_1-MLC".to_string()]
        );
    }
}
