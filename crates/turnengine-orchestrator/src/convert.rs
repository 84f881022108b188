use turnengine_assistant::{AssembledContent, AssembledMessage, PromptRole};
use turnengine_llm::{ChatMessage, Role};

pub fn to_chat_message(msg: &AssembledMessage) -> ChatMessage {
    let role = match msg.role {
        PromptRole::System => Role::System,
        PromptRole::User => Role::User,
        PromptRole::Assistant => Role::Assistant,
    };
    let content = match &msg.content {
        AssembledContent::Text(t) => serde_json::Value::String(t.clone()),
        AssembledContent::Blocks(blocks) => serde_json::Value::Array(blocks.clone()),
    };
    ChatMessage { role, content, tool_call_id: None, name: None }
}
