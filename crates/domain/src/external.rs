//! Contracts for collaborators that live outside this workspace: persistent
//! storage, credential resolution, the UI stream sink, approval transport,
//! and tool handler registration. This crate defines only the trait
//! surface; production implementations are out of scope.

use crate::error::Result;
use crate::tool::{ToolCall, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde_json::Value;

/// Classified tool handler error, surfaced to the model via `ToolResult.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolHandlerErrorCode {
    ArgumentError,
    PermissionDenied,
    NotFound,
    Timeout,
    InternalError,
    Canceled,
    Unknown,
}

/// Registry of tool handlers keyed by tool name. `dispatch` executes a
/// single call; signal tools (`task_complete`, `ask_user`) are never
/// registered here — the controller owns their semantics directly.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn dispatch(&self, call: &ToolCall) -> ToolResult;
}

/// Best-effort persistence sink. Every method may fail; failures are
/// logged by the caller and never propagated into the run's control flow.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist_run_event(&self, event_type: &str, stream_kind: &str, payload_json: Value);
    async fn persist_tool_call(&self, snapshot: Value);
    async fn persist_execution_span(&self, span: Value);
    async fn persist_set_tool_block(&self, idx: usize, block: Value);
    async fn persist_append_markdown_delta(&self, idx: usize, delta: &str);
}

/// NDJSON framing to the UI. Sink errors never abort the run.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn message_start(&self, payload: Value);
    async fn block_start(&self, payload: Value);
    async fn block_delta(&self, payload: Value);
    async fn block_set(&self, payload: Value);
    async fn lifecycle_phase(&self, phase: &str);
    async fn error(&self, message: &str);
    async fn message_end(&self, end_reason: &str);
}

/// Approval transport for `task_complete` confirmation and tool approval.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    async fn wait_for_tool_approval(&self, tool_id: &str, timeout_secs: u64) -> Result<bool>;
}

/// Resolves a provider id to an API key held outside this workspace.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_provider_api_key(&self, provider_id: &str) -> Result<String>;
}
