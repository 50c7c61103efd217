pub mod anthropic;
pub mod naming;
pub mod openai_compat;
pub mod test_support;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use anthropic::AnthropicStyleProvider;
pub use naming::{sanitize_provider_tool_name, ToolNameAliasMap};
pub use openai_compat::OpenAiCompatProvider;
pub use test_support::ScriptedProvider;
pub use traits::{aggregate_turn, LlmProvider, ResponseFormat, TurnRequest};
