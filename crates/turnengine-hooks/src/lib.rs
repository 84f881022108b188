pub mod bridge;
pub mod capability;
pub mod retry;
pub mod types;

pub use bridge::{CompiledHook, HookHost};
pub use capability::{Capability, Delegator};
pub use retry::{run_with_retry, RetryContext, RetryPolicy};
pub use types::{CreateOutcome, FailOutcome, HookName, NextOutcome, RetryOutcome, StreamOutcome};
