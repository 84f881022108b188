use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use turnengine_assistant::store::AssistantStore;
use turnengine_assistant::RawAssistant;
use turnengine_core::{EngineError, Result};

/// SQLite-backed [`AssistantStore`], sharing the same connection shape as
/// [`crate::sqlite::SqliteStore`] but kept as its own table/connection since
/// an assistant directory and a chat database are independently deployable.
pub struct SqliteAssistantStore {
    conn: Mutex<Connection>,
}

impl SqliteAssistantStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| EngineError::Storage(e.to_string()))?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EngineError::Storage(e.to_string()))?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS assistants (
            assistant_id TEXT PRIMARY KEY,
            built_in INTEGER NOT NULL,
            record TEXT NOT NULL
        );",
    )
    .map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(())
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawAssistant> {
    let record: String = row.get("record")?;
    Ok(serde_json::from_str(&record).unwrap_or_default())
}

#[async_trait]
impl AssistantStore for SqliteAssistantStore {
    async fn get(&self, id: &str) -> Result<Option<RawAssistant>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM assistants WHERE assistant_id = ?1", params![id], row_to_raw)
            .optional()
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    async fn upsert(&self, raw: RawAssistant) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let record = serde_json::to_string(&raw).map_err(|e| EngineError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO assistants (assistant_id, built_in, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(assistant_id) DO UPDATE SET built_in = excluded.built_in, record = excluded.record",
            params![raw.assistant_id, raw.built_in as i64, record],
        )
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM assistants WHERE assistant_id = ?1", params![id]).map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_built_in(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM assistants WHERE built_in = 1", []).map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RawAssistant>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM assistants").map_err(|e| EngineError::Storage(e.to_string()))?;
        let rows = stmt.query_map([], row_to_raw).map_err(|e| EngineError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| EngineError::Storage(e.to_string()))
    }
}
