//! Tool Scheduler (§4.3): filters the active tool set by mode/allowlist,
//! dispatches a step's tool calls concurrently, and returns results in
//! original call order. Signal tools never reach the registry.

use al_domain::external::ToolRegistry;
use al_domain::tool::{is_signal_tool, ToolCall, ToolDefinition, ToolResult};

/// Run mode affecting which tools are exposed: plan mode hides mutating
/// tools when the plan-mode guard policy is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Plan,
    Act,
}

/// Compose the active tool set: registry-declared tools minus mutating
/// tools in plan mode, intersected with `allowlist` if non-empty. Signal
/// tools are always filtered out — the controller owns them directly.
pub fn active_tools(registry: &dyn ToolRegistry, mode: SchedulerMode, allowlist: &[String]) -> Vec<ToolDefinition> {
    registry
        .definitions()
        .into_iter()
        .filter(|def| !is_signal_tool(&def.name))
        .filter(|def| !(mode == SchedulerMode::Plan && def.mutating))
        .filter(|def| allowlist.is_empty() || allowlist.iter().any(|a| a == &def.name))
        .collect()
}

/// Dispatch every call in `calls` concurrently; signal-tool calls are
/// skipped (the controller handles them before they ever reach here).
/// Results are returned in the same order as `calls`.
pub async fn dispatch(registry: &dyn ToolRegistry, calls: &[ToolCall]) -> Vec<ToolResult> {
    let futures = calls.iter().filter(|c| !is_signal_tool(&c.tool_name)).map(|c| registry.dispatch(c));
    futures_util::future::join_all(futures).await
}

/// Advisory hook for partial tool-call events (pre-starting long-running
/// invocations). The scheduler never produces a [`ToolResult`] here.
pub fn handle_partial(_call_id: &str, _tool_name: &str, _partial_raw_args: &str) {}
