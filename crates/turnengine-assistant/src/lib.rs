pub mod assembly;
pub mod loader;
pub mod model;
pub mod registry;
pub mod store;

pub use assembly::{assemble, substitute, AssembledContent, AssembledMessage, HistoryEntry, ImageAttachment};
pub use loader::{load_global_prompts, load_map, FsAssistantSource, RawAssistant};
pub use model::{Assistant, Prompt, PromptRole, ToolSet, ToolSpec};
pub use registry::AssistantRegistry;
pub use store::{AssistantStore, MemoryAssistantStore};
