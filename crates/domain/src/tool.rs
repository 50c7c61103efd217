use serde::{Deserialize, Serialize};

/// A tool invocation proposed by the model during a turn.
///
/// `call_id` is provider-assigned and unique within the turn. Ordering
/// across a turn's calls follows the provider's output index; ties are
/// broken by `call_id` lexicographic order (see [`crate::stream::TurnResult`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the model.
///
/// `task_complete` and `ask_user` are reserved "signal tool" names: they
/// appear here (so the model's tool-choice affordance stays uniform) but
/// are filtered out before reaching the [`crate::external::ToolRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    /// Whether invoking this tool can change external state. Plan-mode
    /// guard policies filter these out of `active_tools`.
    #[serde(default)]
    pub mutating: bool,
}

pub const SIGNAL_TOOL_TASK_COMPLETE: &str = "task_complete";
pub const SIGNAL_TOOL_ASK_USER: &str = "ask_user";

/// Whether `name` is a signal tool (`task_complete` or `ask_user`).
///
/// Signal tools are never dispatched to the [`crate::external::ToolRegistry`];
/// the turn controller owns their semantics directly.
pub fn is_signal_tool(name: &str) -> bool {
    name == SIGNAL_TOOL_TASK_COMPLETE || name == SIGNAL_TOOL_ASK_USER
}

// ── ToolResult ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    Aborted,
}

/// Error taxonomy surfaced on a failed [`ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    ArgumentError,
    PermissionDenied,
    Timeout,
    NotFound,
    InvalidState,
    InternalError,
    Canceled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    /// Whether the controller may reasonably expect a repaired retry to
    /// succeed (e.g. `timeout`, not `permission_denied`).
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_fixes: Vec<String>,
}

/// The outcome of one dispatched (or guard-aborted) tool call.
///
/// Every dispatched [`ToolCall`] produces exactly one `ToolResult` whose
/// `tool_id` equals the call's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    /// Short token suitable for the facts ledger, e.g. `"ok"`,
    /// `"tool.argument_error"`, `"guard.doom_loop"`.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_ref: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_id: impl Into<String>, tool_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Success,
            summary: summary.into(),
            details: None,
            data: None,
            error: None,
            truncated: false,
            content_ref: None,
        }
    }

    pub fn aborted(tool_id: impl Into<String>, tool_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Aborted,
            summary: summary.into(),
            details: None,
            data: None,
            error: None,
            truncated: false,
            content_ref: None,
        }
    }

    pub fn error(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        summary: impl Into<String>,
        error: ToolError,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Error,
            summary: summary.into(),
            details: None,
            data: None,
            error: Some(error),
            truncated: false,
            content_ref: None,
        }
    }

    /// JSON payload appended to the transcript as a `tool`-role message.
    pub fn as_message_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "summary": self.summary,
            "details": self.details,
            "truncated": self.truncated,
            "content_ref": self.content_ref,
            "data": self.data,
            "error": self.error,
        })
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// A message in the conversation (provider-agnostic). Ordering within a
/// message list is semantically meaningful and is never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        #[serde(rename = "args")]
        args_json: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResultPart {
        call_id: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    #[serde(rename = "image")]
    Image {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    #[serde(rename = "file")]
    File { uri: String, mime: String },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build the assistant message carrying the original tool_call parts,
    /// preserving order and raw args JSON exactly.
    pub fn assistant_with_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.to_string() });
        }
        for c in calls {
            parts.push(ContentPart::ToolCall {
                id: c.call_id.clone(),
                name: c.tool_name.clone(),
                args_json: c.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResultPart {
                call_id: result.tool_id.clone(),
                payload: result.as_message_payload(),
            }]),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Rough rune (char) count of everything in this content, used by the
    /// token estimator.
    pub fn rune_len(&self) -> usize {
        match self {
            MessageContent::Text(t) => t.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.chars().count(),
                    ContentPart::Image { uri, .. } => uri.chars().count(),
                    ContentPart::File { uri, mime } => uri.chars().count() + mime.chars().count(),
                    ContentPart::ToolCall { name, args_json, .. } => {
                        name.chars().count() + args_json.to_string().chars().count()
                    }
                    ContentPart::ToolResultPart { payload, .. } => payload.to_string().chars().count(),
                })
                .sum(),
        }
    }
}
