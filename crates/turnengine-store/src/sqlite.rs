use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use turnengine_core::{EngineError, Result};

use crate::store::Store;
use crate::types::{Chat, ChatStatus, MessageRecord, StepRecord, StepStatus, StepType};

/// SQLite-backed [`Store`], grounded on the same `Mutex<Connection>` +
/// row-mapping-helper shape used for chat/session persistence.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
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
        "
        CREATE TABLE IF NOT EXISTS chats (
            chat_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            title TEXT,
            assistant_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            last_message_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            metadata TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chats_session ON chats(session_id, last_message_at);
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            request_id TEXT NOT NULL,
            role TEXT NOT NULL,
            type TEXT NOT NULL,
            props TEXT NOT NULL,
            block_id TEXT,
            thread_id TEXT,
            assistant_id TEXT,
            sequence INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, sequence);
        CREATE TABLE IF NOT EXISTS steps (
            step_id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            request_id TEXT NOT NULL,
            assistant_id TEXT NOT NULL,
            stack_id TEXT NOT NULL,
            stack_parent_id TEXT,
            stack_depth INTEGER NOT NULL,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            input TEXT NOT NULL,
            output TEXT NOT NULL,
            space_snapshot TEXT NOT NULL,
            error TEXT,
            sequence INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_steps_request ON steps(request_id, sequence);
        ",
    )
    .map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(())
}

fn row_to_chat(row: &rusqlite::Row) -> rusqlite::Result<Chat> {
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    Ok(Chat {
        chat_id: row.get("chat_id")?,
        session_id: row.get("session_id")?,
        title: row.get("title")?,
        assistant_id: row.get("assistant_id")?,
        mode: row.get("mode")?,
        status: if status == "archived" { ChatStatus::Archived } else { ChatStatus::Active },
        last_message_at: row.get::<_, String>("last_message_at")?.parse().unwrap_or_else(|_| Utc::now()),
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: row.get::<_, String>("updated_at")?.parse().unwrap_or_else(|_| Utc::now()),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    let props: String = row.get("props")?;
    let metadata: String = row.get("metadata")?;
    Ok(MessageRecord {
        message_id: row.get("message_id")?,
        chat_id: row.get("chat_id")?,
        request_id: row.get("request_id")?,
        role: row.get("role")?,
        kind: row.get("type")?,
        props: serde_json::from_str(&props).unwrap_or(serde_json::Value::Null),
        block_id: row.get("block_id")?,
        thread_id: row.get("thread_id")?,
        assistant_id: row.get("assistant_id")?,
        sequence: row.get("sequence")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<StepRecord> {
    let kind: String = row.get("type")?;
    let status: String = row.get("status")?;
    let input: String = row.get("input")?;
    let output: String = row.get("output")?;
    let snapshot: String = row.get("space_snapshot")?;
    let metadata: String = row.get("metadata")?;
    Ok(StepRecord {
        step_id: row.get("step_id")?,
        chat_id: row.get("chat_id")?,
        request_id: row.get("request_id")?,
        assistant_id: row.get("assistant_id")?,
        stack_id: row.get("stack_id")?,
        stack_parent_id: row.get("stack_parent_id")?,
        stack_depth: row.get::<_, i64>("stack_depth")? as u32,
        kind: parse_step_type(&kind),
        status: parse_step_status(&status),
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        output: serde_json::from_str(&output).unwrap_or(serde_json::Value::Null),
        space_snapshot: serde_json::from_str(&snapshot).unwrap_or_default(),
        error: row.get("error")?,
        sequence: row.get("sequence")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: row.get::<_, String>("updated_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn step_type_str(t: StepType) -> &'static str {
    match t {
        StepType::Input => "input",
        StepType::HookCreate => "hook_create",
        StepType::Llm => "llm",
        StepType::Tool => "tool",
        StepType::HookNext => "hook_next",
        StepType::Delegate => "delegate",
    }
}

fn parse_step_type(s: &str) -> StepType {
    match s {
        "hook_create" => StepType::HookCreate,
        "llm" => StepType::Llm,
        "tool" => StepType::Tool,
        "hook_next" => StepType::HookNext,
        "delegate" => StepType::Delegate,
        _ => StepType::Input,
    }
}

fn step_status_str(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Interrupted => "interrupted",
    }
}

fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "interrupted" => StepStatus::Interrupted,
        _ => StepStatus::Pending,
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self))]
    async fn ensure_chat(&self, chat_id: &str, session_id: &str, assistant_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row("SELECT chat_id FROM chats WHERE chat_id = ?1", params![chat_id], |r| r.get(0))
            .optional()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        if existing.is_some() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chats (chat_id, session_id, title, assistant_id, mode, status, last_message_at, created_at, updated_at, metadata)
             VALUES (?1, ?2, NULL, ?3, 'chat', 'active', ?4, ?4, ?4, '{}')",
            params![chat_id, session_id, assistant_id, now],
        )
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM chats WHERE chat_id = ?1", params![chat_id], row_to_chat)
            .optional()
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Write-1 (§4.8): append a single user message with
    /// `sequence = previous_max + 1`.
    #[instrument(skip(self, props))]
    async fn append_user_message(&self, chat_id: &str, request_id: &str, props: serde_json::Value) -> Result<MessageRecord> {
        let conn = self.conn.lock().unwrap();
        let max_seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE chat_id = ?1", params![chat_id], |r| r.get(0))
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let record = MessageRecord {
            message_id: uuid::Uuid::now_v7().to_string(),
            chat_id: chat_id.to_string(),
            request_id: request_id.to_string(),
            role: "user".to_string(),
            kind: "text".to_string(),
            props,
            block_id: None,
            thread_id: None,
            assistant_id: None,
            sequence: max_seq + 1,
            metadata: Default::default(),
            created_at: Utc::now(),
        };
        insert_message(&conn, &record)?;
        Ok(record)
    }

    /// Write-2 (§4.8): batch-append every buffered message and step record.
    #[instrument(skip(self, messages, steps))]
    async fn commit_turn(&self, chat_id: &str, messages: Vec<MessageRecord>, steps: Vec<StepRecord>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| EngineError::Storage(e.to_string()))?;
        let max_seq: i64 = tx
            .query_row("SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE chat_id = ?1", params![chat_id], |r| r.get(0))
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        for (i, mut record) in messages.into_iter().enumerate() {
            record.sequence = max_seq + 1 + i as i64;
            insert_message(&tx, &record)?;
        }
        for step in &steps {
            insert_step(&tx, step)?;
        }
        tx.execute(
            "UPDATE chats SET last_message_at = ?2, updated_at = ?2 WHERE chat_id = ?1",
            params![chat_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn history(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM messages WHERE chat_id = ?1 ORDER BY sequence ASC")
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![chat_id], row_to_message)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Locate the most recent `interrupted`/`failed` step for `chat_id`
    /// (§4.8 Resume, step 1).
    #[instrument(skip(self))]
    async fn last_unfinished_step(&self, chat_id: &str) -> Result<Option<StepRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM steps WHERE chat_id = ?1 AND status IN ('interrupted','failed')
             ORDER BY sequence DESC LIMIT 1",
            params![chat_id],
            row_to_step,
        )
        .optional()
        .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Walk `stack_parent_id` upward to rebuild the call stack rooted at
    /// `step` (§4.8 Resume, step 3), root first.
    #[instrument(skip(self, step))]
    async fn ancestor_chain(&self, step: &StepRecord) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut chain = vec![step.clone()];
        let mut parent_id = step.stack_parent_id.clone();
        while let Some(pid) = parent_id {
            let parent: Option<StepRecord> = conn
                .query_row("SELECT * FROM steps WHERE stack_id = ?1", params![pid], row_to_step)
                .optional()
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            match parent {
                Some(p) => {
                    parent_id = p.stack_parent_id.clone();
                    chain.push(p);
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    #[instrument(skip(self))]
    async fn mark_ancestors_completed(&self, steps: &[StepRecord]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for step in steps {
            if matches!(step.kind, StepType::Delegate | StepType::Llm) {
                conn.execute(
                    "UPDATE steps SET status = 'completed', updated_at = ?2 WHERE step_id = ?1",
                    params![step.step_id, Utc::now().to_rfc3339()],
                )
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn list_chats(&self, session_id: &str, filter: &crate::types::ChatFilter) -> Result<crate::types::ChatPage> {
        let conn = self.conn.lock().unwrap();
        let like = filter.keywords.as_ref().map(|k| format!("%{}%", k));
        let total: i64 = match &like {
            Some(like) => conn
                .query_row(
                    "SELECT COUNT(*) FROM chats WHERE session_id = ?1 AND title LIKE ?2",
                    params![session_id, like],
                    |r| r.get(0),
                )
                .map_err(|e| EngineError::Storage(e.to_string()))?,
            None => conn
                .query_row("SELECT COUNT(*) FROM chats WHERE session_id = ?1", params![session_id], |r| r.get(0))
                .map_err(|e| EngineError::Storage(e.to_string()))?,
        };

        let pagesize = filter.pagesize.max(1) as i64;
        let offset = (filter.page as i64) * pagesize;
        // `order.sql()` is a fixed "ASC"/"DESC" literal, never user input, so
        // interpolating it directly is safe — rusqlite has no bind syntax
        // for ORDER BY direction.
        let direction = filter.order.sql();
        let chats = match &like {
            Some(like) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT * FROM chats WHERE session_id = ?1 AND title LIKE ?2
                         ORDER BY last_message_at {direction} LIMIT ?3 OFFSET ?4"
                    ))
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
                stmt.query_map(params![session_id, like, pagesize, offset], row_to_chat)
                    .map_err(|e| EngineError::Storage(e.to_string()))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| EngineError::Storage(e.to_string()))?
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!("SELECT * FROM chats WHERE session_id = ?1 ORDER BY last_message_at {direction} LIMIT ?2 OFFSET ?3"))
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
                stmt.query_map(params![session_id, pagesize, offset], row_to_chat)
                    .map_err(|e| EngineError::Storage(e.to_string()))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| EngineError::Storage(e.to_string()))?
            }
        };

        Ok(crate::types::ChatPage { chats, total: total as u64 })
    }

    #[instrument(skip(self))]
    async fn latest_chat(&self, session_id: &str) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM chats WHERE session_id = ?1 ORDER BY last_message_at DESC LIMIT 1",
            params![session_id],
            row_to_chat,
        )
        .optional()
        .map_err(|e| EngineError::Storage(e.to_string()))
    }

    #[instrument(skip(self, metadata))]
    async fn update_chat(&self, chat_id: &str, session_id: &str, title: Option<String>, metadata: Option<serde_json::Value>) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if let Some(title) = &title {
            conn.execute(
                "UPDATE chats SET title = ?3, updated_at = ?4 WHERE chat_id = ?1 AND session_id = ?2",
                params![chat_id, session_id, title, now],
            )
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        if let Some(metadata) = &metadata {
            conn.execute(
                "UPDATE chats SET metadata = ?3, updated_at = ?4 WHERE chat_id = ?1 AND session_id = ?2",
                params![chat_id, session_id, serde_json::to_string(metadata).unwrap_or_default(), now],
            )
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        conn.query_row(
            "SELECT * FROM chats WHERE chat_id = ?1 AND session_id = ?2",
            params![chat_id, session_id],
            row_to_chat,
        )
        .optional()
        .map_err(|e| EngineError::Storage(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete_chat(&self, chat_id: &str, session_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| EngineError::Storage(e.to_string()))?;
        let removed = tx
            .execute("DELETE FROM chats WHERE chat_id = ?1 AND session_id = ?2", params![chat_id, session_id])
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        if removed > 0 {
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id]).map_err(|e| EngineError::Storage(e.to_string()))?;
            tx.execute("DELETE FROM steps WHERE chat_id = ?1", params![chat_id]).map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self))]
    async fn clear_chats(&self, session_id: &str) -> Result<u64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| EngineError::Storage(e.to_string()))?;
        let chat_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT chat_id FROM chats WHERE session_id = ?1").map_err(|e| EngineError::Storage(e.to_string()))?;
            stmt.query_map(params![session_id], |r| r.get(0))
                .map_err(|e| EngineError::Storage(e.to_string()))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| EngineError::Storage(e.to_string()))?
        };
        for chat_id in &chat_ids {
            tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id]).map_err(|e| EngineError::Storage(e.to_string()))?;
            tx.execute("DELETE FROM steps WHERE chat_id = ?1", params![chat_id]).map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        tx.execute("DELETE FROM chats WHERE session_id = ?1", params![session_id]).map_err(|e| EngineError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(chat_ids.len() as u64)
    }
}

fn insert_message(conn: &Connection, record: &MessageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (message_id, chat_id, request_id, role, type, props, block_id, thread_id, assistant_id, sequence, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.message_id,
            record.chat_id,
            record.request_id,
            record.role,
            record.kind,
            serde_json::to_string(&record.props).unwrap_or_default(),
            record.block_id,
            record.thread_id,
            record.assistant_id,
            record.sequence,
            serde_json::to_string(&record.metadata).unwrap_or_default(),
            record.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(())
}

fn insert_step(conn: &Connection, step: &StepRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO steps (step_id, chat_id, request_id, assistant_id, stack_id, stack_parent_id, stack_depth, type, status, input, output, space_snapshot, error, sequence, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            step.step_id,
            step.chat_id,
            step.request_id,
            step.assistant_id,
            step.stack_id,
            step.stack_parent_id,
            step.stack_depth,
            step_type_str(step.kind),
            step_status_str(step.status),
            serde_json::to_string(&step.input).unwrap_or_default(),
            serde_json::to_string(&step.output).unwrap_or_default(),
            serde_json::to_string(&step.space_snapshot).unwrap_or_default(),
            step.error,
            step.sequence,
            serde_json::to_string(&step.metadata).unwrap_or_default(),
            step.created_at.to_rfc3339(),
            step.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::types::ChatFilter;

    use super::*;

    #[tokio::test]
    async fn ensure_chat_is_idempotent_and_scoped() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();

        let chat = store.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(chat.session_id, "s1");
        assert_eq!(chat.assistant_id, "a1");
        assert_eq!(chat.status, ChatStatus::Active);
    }

    #[tokio::test]
    async fn list_chats_scopes_by_session_and_paginates() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.ensure_chat("c2", "s1", "a1").await.unwrap();
        store.ensure_chat("c3", "s2", "a1").await.unwrap();

        let page = store.list_chats("s1", &ChatFilter { keywords: None, page: 0, pagesize: 10, order: Default::default() }).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.chats.len(), 2);
        assert!(page.chats.iter().all(|c| c.session_id == "s1"));

        let page2 = store.list_chats("s2", &ChatFilter { keywords: None, page: 0, pagesize: 10, order: Default::default() }).await.unwrap();
        assert_eq!(page2.total, 1);
    }

    #[tokio::test]
    async fn list_chats_filters_by_keyword_and_respects_pagesize() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.update_chat("c1", "s1", Some("Trip planning".to_string()), None).await.unwrap();
        store.ensure_chat("c2", "s1", "a1").await.unwrap();
        store.update_chat("c2", "s1", Some("Recipe ideas".to_string()), None).await.unwrap();

        let filtered = store.list_chats("s1", &ChatFilter { keywords: Some("trip".to_string()), page: 0, pagesize: 10, order: Default::default() }).await.unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.chats[0].chat_id, "c1");

        let first_page = store.list_chats("s1", &ChatFilter { keywords: None, page: 0, pagesize: 1, order: Default::default() }).await.unwrap();
        assert_eq!(first_page.total, 2);
        assert_eq!(first_page.chats.len(), 1);
    }

    #[tokio::test]
    async fn latest_chat_returns_most_recent() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.ensure_chat("c2", "s1", "a1").await.unwrap();

        let latest = store.latest_chat("s1").await.unwrap().unwrap();
        assert_eq!(latest.chat_id, "c2", "c2 was created after c1, so it should sort first");
    }

    #[tokio::test]
    async fn latest_chat_none_for_unknown_session() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.latest_chat("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_chat_rejects_wrong_session() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();

        let result = store.update_chat("c1", "s2", Some("nope".to_string()), None).await.unwrap();
        assert!(result.is_none());

        let chat = store.get_chat("c1").await.unwrap().unwrap();
        assert_eq!(chat.title, None);
    }

    #[tokio::test]
    async fn delete_chat_cascades_messages_and_steps() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.append_user_message("c1", "r1", serde_json::json!({"text": "hi"})).await.unwrap();

        let removed = store.delete_chat("c1", "s1").await.unwrap();
        assert!(removed);
        assert!(store.get_chat("c1").await.unwrap().is_none());
        assert!(store.history("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_chat_returns_false_for_wrong_session() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        assert!(!store.delete_chat("c1", "s2").await.unwrap());
        assert!(store.get_chat("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_chats_removes_only_owned_chats() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store.ensure_chat("c2", "s1", "a1").await.unwrap();
        store.ensure_chat("c3", "s2", "a1").await.unwrap();
        store.append_user_message("c1", "r1", serde_json::json!({"text": "hi"})).await.unwrap();

        let cleared = store.clear_chats("s1").await.unwrap();
        assert_eq!(cleared, 2);
        assert!(store.get_chat("c1").await.unwrap().is_none());
        assert!(store.get_chat("c2").await.unwrap().is_none());
        assert!(store.get_chat("c3").await.unwrap().is_some());
        assert!(store.history("c1").await.unwrap().is_empty());
    }
}
