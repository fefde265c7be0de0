// Cache ledger: which model ids are known to be materialized locally

use super::{current_timestamp_millis, db_error, Database, SharedDatabase};
use rusqlite::params;
use std::collections::BTreeSet;
use std::sync::Mutex;

impl Database {
    /// Record a model as cached (re-adding refreshes `cached_at`)
    pub fn add_cached_model(&self, model_id: &str) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "INSERT OR REPLACE INTO cached_models (model_id, cached_at) VALUES (?1, ?2)",
            params![model_id, current_timestamp_millis()],
        )
        .map_err(db_error("add cached model"))?;
        Ok(())
    }

    pub fn remove_cached_model(&self, model_id: &str) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "DELETE FROM cached_models WHERE model_id = ?1",
            params![model_id],
        )
        .map_err(db_error("remove cached model"))?;
        Ok(())
    }

    /// All cached model ids, oldest first
    pub fn cached_models(&self) -> Result<Vec<String>, String> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare("SELECT model_id FROM cached_models ORDER BY cached_at, model_id")
            .map_err(db_error("prepare cached models query"))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_error("query cached models"))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_error("read cached model row"))
    }

    pub fn clear_cached_models(&self) -> Result<(), String> {
        let conn = self.connection();
        conn.execute("DELETE FROM cached_models", [])
            .map_err(db_error("clear cached models"))?;
        Ok(())
    }
}

/// Ledger read once from the database and written through on every change.
///
/// Membership only says the artifacts were materialized at some point; it says
/// nothing about whether an engine is currently loaded.
pub struct CacheLedger {
    db: SharedDatabase,
    entries: Mutex<BTreeSet<String>>,
}

impl CacheLedger {
    pub fn load(db: SharedDatabase) -> Result<Self, String> {
        let entries = db.cached_models()?.into_iter().collect();
        Ok(Self {
            db,
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has(&self, model_id: &str) -> bool {
        self.entries().contains(model_id)
    }

    /// In-memory membership changes even when persisting fails; the error is
    /// returned so the caller can log it.
    pub fn add(&self, model_id: &str) -> Result<(), String> {
        self.entries().insert(model_id.to_string());
        self.db.add_cached_model(model_id)
    }

    pub fn remove(&self, model_id: &str) -> Result<(), String> {
        self.entries().remove(model_id);
        self.db.remove_cached_model(model_id)
    }

    pub fn all(&self) -> BTreeSet<String> {
        self.entries().clone()
    }

    pub fn clear(&self) -> Result<(), String> {
        self.entries().clear();
        self.db.clear_cached_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn create_test_db() -> SharedDatabase {
        Arc::new(Database::new(":memory:").unwrap())
    }

    #[test]
    fn test_add_and_remove_cached_model() {
        let db = create_test_db();
        db.add_cached_model("a").unwrap();
        db.add_cached_model("b").unwrap();
        db.add_cached_model("a").unwrap();
        assert_eq!(db.cached_models().unwrap().len(), 2);

        db.remove_cached_model("a").unwrap();
        assert_eq!(db.cached_models().unwrap(), vec!["b".to_string()]);

        // Removing an unknown id is not an error
        db.remove_cached_model("missing").unwrap();
    }

    #[test]
    fn test_ledger_reads_existing_rows() {
        let db = create_test_db();
        db.add_cached_model("Qwen3-4B-q4f16_1-MLC").unwrap();

        let ledger = CacheLedger::load(db).unwrap();
        assert!(ledger.has("Qwen3-4B-q4f16_1-MLC"));
        assert!(!ledger.has("other"));
    }

    #[test]
    fn test_ledger_writes_through() {
        let db = create_test_db();
        let ledger = CacheLedger::load(db.clone()).unwrap();

        ledger.add("x").unwrap();
        ledger.add("y").unwrap();
        assert_eq!(db.cached_models().unwrap().len(), 2);

        ledger.remove("x").unwrap();
        assert!(!ledger.has("x"));
        assert_eq!(db.cached_models().unwrap(), vec!["y".to_string()]);

        ledger.clear().unwrap();
        assert!(ledger.all().is_empty());
        assert!(db.cached_models().unwrap().is_empty());
    }
}
