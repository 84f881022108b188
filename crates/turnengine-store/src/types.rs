use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Active,
    Archived,
}

/// `{chat_id, title?, assistant_id, mode, status, last_message_at,
/// created/updated_at, metadata}` (§3 "Chat session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    /// The session principal this chat is scoped to — the permission field
    /// §6 describes the storage layer as adding on top of the core model.
    pub session_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub assistant_id: String,
    pub mode: String,
    pub status: ChatStatus,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Filters for a paginated chat listing (`GET /chats`).
#[derive(Debug, Clone, Default)]
pub struct ChatFilter {
    pub keywords: Option<String>,
    pub page: u32,
    pub pagesize: u32,
    /// Sort direction on `last_message_at`; `desc` (default) or `asc`.
    pub order: ChatOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatOrder {
    #[default]
    Desc,
    Asc,
}

impl ChatOrder {
    pub fn sql(self) -> &'static str {
        match self {
            ChatOrder::Desc => "DESC",
            ChatOrder::Asc => "ASC",
        }
    }

    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.eq_ignore_ascii_case("asc") => ChatOrder::Asc,
            _ => ChatOrder::Desc,
        }
    }
}

/// A page of [`Chat`] rows plus the total matching count, for `GET /chats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    pub total: u64,
}

/// `{message_id, chat_id, request_id, role, type, props, block_id?,
/// thread_id?, assistant_id?, sequence, metadata, timestamps}` (§3
/// "Message record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub chat_id: String,
    pub request_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub props: Value,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub sequence: i64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Input,
    HookCreate,
    Llm,
    Tool,
    HookNext,
    Delegate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

/// `{step_id, chat_id, request_id, assistant_id, stack_id,
/// stack_parent_id, stack_depth, type, status, input, output,
/// space_snapshot, error?, sequence, metadata, timestamps}` (§3 "Step
/// record"). Steps form a forest per request where edges are
/// `stack_parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub chat_id: String,
    pub request_id: String,
    pub assistant_id: String,
    pub stack_id: String,
    #[serde(default)]
    pub stack_parent_id: Option<String>,
    pub stack_depth: u32,
    #[serde(rename = "type")]
    pub kind: StepType,
    pub status: StepStatus,
    pub input: Value,
    pub output: Value,
    pub space_snapshot: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub sequence: i64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
