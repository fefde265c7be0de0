// User-registered custom models

use super::{current_timestamp_millis, db_error, Database};
use offline_types::CustomModel;
use rusqlite::params;

impl Database {
    /// Insert or replace a custom model entry
    pub fn save_custom_model(&self, model: &CustomModel) -> Result<(), String> {
        let conn = self.connection();
        conn.execute(
            "INSERT OR REPLACE INTO custom_models (id, name, model_url, model_lib_url, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                model.id,
                model.name,
                model.model_url,
                model.model_lib_url,
                current_timestamp_millis()
            ],
        )
        .map_err(db_error("save custom model"))?;
        Ok(())
    }

    /// Returns whether a row was removed
    pub fn remove_custom_model(&self, id: &str) -> Result<bool, String> {
        let conn = self.connection();
        let removed = conn
            .execute("DELETE FROM custom_models WHERE id = ?1", params![id])
            .map_err(db_error("remove custom model"))?;
        Ok(removed > 0)
    }

    pub fn list_custom_models(&self) -> Result<Vec<CustomModel>, String> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare("SELECT id, name, model_url, model_lib_url FROM custom_models ORDER BY added_at, id")
            .map_err(db_error("prepare custom models query"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CustomModel {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    model_url: row.get(2)?,
                    model_lib_url: row.get(3)?,
                })
            })
            .map_err(db_error("query custom models"))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_error("read custom model row"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> CustomModel {
        CustomModel {
            id: id.to_string(),
            name: format!("{id} name"),
            model_url: format!("https://example.com/{id}"),
            model_lib_url: format!("https://example.com/{id}.wasm"),
        }
    }

    #[test]
    fn test_custom_model_registry() {
        let db = Database::new(":memory:").unwrap();
        db.save_custom_model(&sample("one")).unwrap();
        db.save_custom_model(&sample("two")).unwrap();

        let models = db.list_custom_models().unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0], sample("one"));

        assert!(db.remove_custom_model("one").unwrap());
        assert!(!db.remove_custom_model("one").unwrap());
        assert_eq!(db.list_custom_models().unwrap(), vec![sample("two")]);
    }

    #[test]
    fn test_save_replaces_existing_entry() {
        let db = Database::new(":memory:").unwrap();
        db.save_custom_model(&sample("one")).unwrap();

        let mut updated = sample("one");
        updated.model_url = "https://example.com/moved".to_string();
        db.save_custom_model(&updated).unwrap();

        let models = db.list_custom_models().unwrap();
        assert_eq!(models, vec![updated]);
    }
}
