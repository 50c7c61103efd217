pub mod cancel;
pub mod config;
pub mod error;
pub mod external;
pub mod runtime_state;
pub mod stream;
pub mod tool;

pub use cancel::{CancelReason, CancelToken};
pub use error::{Error, Result};
pub use runtime_state::{LedgerEntry, RuntimeState, TodoSnapshot};
pub use stream::{BoxStream, FinishReason, SourceRef, StreamEvent, TurnResult, Usage};
pub use tool::{
    ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition, ToolError, ToolErrorCode,
    ToolResult, ToolStatus,
};
