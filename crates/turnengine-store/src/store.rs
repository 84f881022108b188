use async_trait::async_trait;
use turnengine_core::Result;

use crate::types::{Chat, ChatFilter, ChatPage, MessageRecord, StepRecord};

/// The conversational persistence boundary (C8). Out of scope per §1
/// ("the KV/SQL/document storage back-ends are assumed to satisfy the
/// Store interface"); [`crate::sqlite::SqliteStore`] is the one concrete
/// implementation this crate ships.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ensure_chat(&self, chat_id: &str, session_id: &str, assistant_id: &str) -> Result<()>;
    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>>;

    /// Write-1: append the user message at turn entry.
    async fn append_user_message(&self, chat_id: &str, request_id: &str, props: serde_json::Value) -> Result<MessageRecord>;

    /// Write-2: batch-append every message/step buffered during the turn.
    async fn commit_turn(&self, chat_id: &str, messages: Vec<MessageRecord>, steps: Vec<StepRecord>) -> Result<()>;

    async fn history(&self, chat_id: &str) -> Result<Vec<MessageRecord>>;

    /// Resume step 1: locate the last interrupted/failed step.
    async fn last_unfinished_step(&self, chat_id: &str) -> Result<Option<StepRecord>>;

    /// Resume step 3: rebuild the call stack, root first.
    async fn ancestor_chain(&self, step: &StepRecord) -> Result<Vec<StepRecord>>;

    /// Resume step 4 (success path): mark every ancestor delegate/llm step
    /// completed.
    async fn mark_ancestors_completed(&self, steps: &[StepRecord]) -> Result<()>;

    /// `GET /chats`: paginated listing scoped to `session_id`.
    async fn list_chats(&self, session_id: &str, filter: &ChatFilter) -> Result<ChatPage>;

    /// `GET /chats/latest`: the most recently active chat for this session,
    /// if any.
    async fn latest_chat(&self, session_id: &str) -> Result<Option<Chat>>;

    /// `POST /chats/:id`: rename or retag a chat. Returns `None` if the
    /// chat does not exist or is not owned by `session_id`.
    async fn update_chat(&self, chat_id: &str, session_id: &str, title: Option<String>, metadata: Option<serde_json::Value>) -> Result<Option<Chat>>;

    /// `DELETE /chats/:id`: delete a chat and its messages/steps. Returns
    /// `false` if no owned row matched.
    async fn delete_chat(&self, chat_id: &str, session_id: &str) -> Result<bool>;

    /// `DELETE /dangerous/clear_chats`: purge every chat owned by
    /// `session_id`. Returns the number of chats removed.
    async fn clear_chats(&self, session_id: &str) -> Result<u64>;
}
