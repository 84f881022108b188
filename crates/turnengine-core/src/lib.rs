pub mod config;
pub mod error;
pub mod types;

pub use config::{AssistantsConfig, AuthConfig, AuthMode, DatabaseConfig, EngineConfig, GatewayConfig, RetryConfig};
pub use error::{EngineError, Result};
pub use types::{ClientType, SharedSpace, TurnContext};
