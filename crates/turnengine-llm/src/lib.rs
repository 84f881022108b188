pub mod adapter;
pub mod openai;
pub mod types;

pub use adapter::LlmAdapter;
pub use openai::OpenAiAdapter;
pub use types::{
    ChatMessage, ChatOptions, DeltaControl, ProviderError, Role, StreamDelta, ToolCall, ToolChoice, ToolDefinition, Usage,
};
