pub mod assistant_store;
pub mod buffer;
pub mod resume;
pub mod sqlite;
pub mod store;
pub mod types;

pub use assistant_store::SqliteAssistantStore;
pub use buffer::{ExitReason, TurnBuffer, TurnWriteGuard};
pub use resume::{plan_resume, replay_action, ReplayAction, ResumePlan};
pub use sqlite::SqliteStore;
pub use store::Store;
pub use types::{Chat, ChatFilter, ChatOrder, ChatPage, ChatStatus, MessageRecord, StepRecord, StepStatus, StepType};
