pub mod convert;
pub mod delegate;
pub mod engine;
pub mod llm_step;
pub mod resume;
pub mod turn;

pub use delegate::TurnDelegator;
pub use engine::Engine;
pub use llm_step::run_llm_turn;
pub use resume::resume_chat;
pub use turn::{run_turn, TurnInput, TurnOutput};
