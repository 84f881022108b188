pub mod dispatch;
pub mod extract;
pub mod repair;

pub use dispatch::{dispatch, Tool, ToolOutcome, ToolRegistry};
pub use extract::extract_tool_blocks;
pub use repair::{parse_tool_body, ParsedCall};
