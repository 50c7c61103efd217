use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
///
/// The adapter emits these synchronously as the provider stream is
/// drained; the turn controller never introspects provider-specific
/// frames, only this canonical set.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "thinking_delta")]
    ThinkingDelta { text: String },

    #[serde(rename = "tool_call_start")]
    ToolCallStart { call_id: String, tool_name: String },

    /// Incremental tool-call argument data. `raw` is the cumulative raw
    /// JSON text seen so far for this call; `parsed` is a best-effort
    /// parse of `raw` (`None` while it remains invalid JSON).
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta {
        call_id: String,
        raw: String,
        parsed: Option<serde_json::Value>,
    },

    #[serde(rename = "tool_call_end")]
    ToolCallEnd {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "usage")]
    Usage { usage: Usage },

    #[serde(rename = "finish_reason")]
    FinishReason { reason: FinishReason },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Canonical finish reason, after mapping from provider-specific statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Unknown,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub reasoning: u32,
}

/// A reference to supporting material the model cited while answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The aggregated result of one provider turn, assembled by the adapter
/// from the `StreamEvent` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub finish_reason: FinishReason,
    pub text: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Opaque provider-specific diagnostic payload, kept only for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_diag: Option<serde_json::Value>,
}

impl TurnResult {
    /// Finish reason is forced to `tool_calls` whenever any calls survived
    /// to the final result, regardless of what the provider reported.
    pub fn normalize_finish_reason(mut self) -> Self {
        if !self.tool_calls.is_empty() {
            self.finish_reason = FinishReason::ToolCalls;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_forces_tool_calls_when_calls_present() {
        let result = TurnResult {
            finish_reason: FinishReason::Stop,
            text: String::new(),
            reasoning: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "1".into(),
                tool_name: "exec".into(),
                arguments: serde_json::json!({}),
            }],
            usage: Usage::default(),
            sources: vec![],
            raw_diag: None,
        }
        .normalize_finish_reason();
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn normalize_leaves_stop_when_no_calls() {
        let result = TurnResult {
            finish_reason: FinishReason::Stop,
            text: "done".into(),
            reasoning: String::new(),
            tool_calls: vec![],
            usage: Usage::default(),
            sources: vec![],
            raw_diag: None,
        }
        .normalize_finish_reason();
        assert_eq!(result.finish_reason, FinishReason::Stop);
    }
}
