//! In-memory [`ToolRegistry`] test double. Scripted by name: each call
//! looks up a canned [`ToolResult`] by `tool_name`, falling back to a
//! generic `ok` result when none was registered.

use al_domain::error::Result;
use al_domain::external::{ApprovalSink, ToolRegistry};
use al_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct StubRegistry {
    definitions: Vec<ToolDefinition>,
    canned: Mutex<HashMap<String, ToolResult>>,
}

impl StubRegistry {
    pub fn new(definitions: Vec<ToolDefinition>) -> Self {
        Self { definitions, canned: Mutex::new(HashMap::new()) }
    }

    /// Register the result returned the next time `tool_name` is dispatched.
    pub fn stub(&self, tool_name: &str, result: ToolResult) {
        self.canned.lock().insert(tool_name.to_string(), result);
    }
}

#[async_trait]
impl ToolRegistry for StubRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.canned.lock().get(&call.tool_name) {
            Some(stubbed) => ToolResult { tool_id: call.call_id.clone(), ..stubbed.clone() },
            None => ToolResult::ok(call.call_id.clone(), call.tool_name.clone(), "ok"),
        }
    }
}

/// Scripted [`ApprovalSink`]: returns a fixed verdict for every call,
/// regardless of `tool_id`.
pub struct StubApprovalSink {
    verdict: bool,
}

impl StubApprovalSink {
    pub fn approving() -> Self {
        Self { verdict: true }
    }

    pub fn rejecting() -> Self {
        Self { verdict: false }
    }
}

#[async_trait]
impl ApprovalSink for StubApprovalSink {
    async fn wait_for_tool_approval(&self, _tool_id: &str, _timeout_secs: u64) -> Result<bool> {
        Ok(self.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::tool::{ToolError, ToolErrorCode, ToolStatus};

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition { name: name.into(), description: "".into(), parameters: serde_json::json!({}), mutating: false }
    }

    #[tokio::test]
    async fn unstubbed_call_returns_generic_ok() {
        let registry = StubRegistry::new(vec![def("exec")]);
        let call = ToolCall { call_id: "a".into(), tool_name: "exec".into(), arguments: serde_json::json!({}) };
        let result = registry.dispatch(&call).await;
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.tool_id, "a");
    }

    #[tokio::test]
    async fn stubbed_call_returns_canned_result_with_matching_tool_id() {
        let registry = StubRegistry::new(vec![def("exec")]);
        registry.stub(
            "exec",
            ToolResult::error(
                "placeholder",
                "exec",
                "tool.argument_error",
                ToolError { code: ToolErrorCode::ArgumentError, message: "bad arg".into(), retryable: true, suggested_fixes: vec![] },
            ),
        );
        let call = ToolCall { call_id: "real-id".into(), tool_name: "exec".into(), arguments: serde_json::json!({}) };
        let result = registry.dispatch(&call).await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.tool_id, "real-id");
    }
}
