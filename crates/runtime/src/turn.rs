//! Turn Controller (§4.2): drives the bounded step loop — provider call,
//! classification, guard evaluation, dispatch, and termination.

use crate::compact;
use crate::guards::{self, AskUserOrigin, DoomLoopVerdict, RunMode, SignatureTracker};
use crate::messages::{estimate_tokens, pressure, MessageStore};
use crate::prompt::{self, Complexity as PromptComplexity, ExceptionOverlay, RunMode as PromptRunMode, RuntimeContext};
use crate::scheduler::{self, SchedulerMode};
use al_domain::cancel::{CancelReason, CancelToken};
use al_domain::config::{CompactionConfig, GuardConfig, RunBudgetConfig, TodoPolicyConfig};
use al_domain::external::{ApprovalSink, ToolRegistry};
use al_domain::runtime_state::{LedgerEntry, RuntimeState};
use al_domain::stream::{FinishReason, TurnResult};
use al_domain::tool::{
    is_signal_tool, Message, ToolCall, ToolDefinition, ToolError, ToolErrorCode, ToolResult, ToolStatus,
};
use al_providers::{aggregate_turn, LlmProvider, TurnRequest};
use std::time::Duration;

const SIGNAL_TASK_COMPLETE: &str = "task_complete";
const SIGNAL_ASK_USER: &str = "ask_user";

fn task_complete_definition() -> ToolDefinition {
    ToolDefinition {
        name: SIGNAL_TASK_COMPLETE.into(),
        description: "Signal that the task is finished.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "result": {"type": "string"},
                "evidence_refs": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["result"],
        }),
        mutating: false,
    }
}

fn ask_user_definition() -> ToolDefinition {
    ToolDefinition {
        name: SIGNAL_ASK_USER.into(),
        description: "Ask the user a clarifying question.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "question": {"type": "string"},
                "options": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["question"],
        }),
        mutating: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Task,
    Social,
    Creative,
}

pub struct RunOptions {
    pub mode: RunMode,
    pub intent: Intent,
    pub model: String,
    pub context_limit: u32,
    pub token_factor: f64,
    pub working_dir: String,
    pub objective: String,
    pub require_user_confirm_on_task_complete: bool,
}

/// Why a run ended. Drives the user-facing run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizationReason {
    TaskComplete,
    TaskCompleteForced,
    AskUserWaitingModel,
    AskUserWaitingGuard { reason: &'static str },
    Error(String),
    Canceled,
    TimedOut,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackpressureKind {
    Length,
    ToolCallsOrUnknownNoParsed,
    NoTextNoCalls,
    TextNoCalls,
}

enum StepClassification {
    ToolCalls(Vec<ToolCall>),
    AskUser { question: String, options: Vec<String> },
    TaskComplete { call_id: String, result: String, evidence_refs: Vec<String> },
    Backpressure(BackpressureKind),
}

fn extract_signal_call<'a>(calls: &'a [ToolCall], name: &str) -> Option<&'a ToolCall> {
    calls.iter().find(|c| c.tool_name == name)
}

fn string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

/// Trim, dedupe, cap length (≤120 runes) and count (≤4) of ask_user options.
fn sanitize_ask_user_options(options: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for opt in options {
        let trimmed: String = opt.trim().chars().take(120).collect();
        if trimmed.is_empty() || !seen.insert(trimmed.clone()) {
            continue;
        }
        out.push(trimmed);
        if out.len() == 4 {
            break;
        }
    }
    out
}

fn classify_step(result: &TurnResult) -> StepClassification {
    if let Some(call) = extract_signal_call(&result.tool_calls, SIGNAL_TASK_COMPLETE) {
        let result_text = call.arguments.get("result").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let evidence_refs = string_array(&call.arguments, "evidence_refs");
        return StepClassification::TaskComplete { call_id: call.call_id.clone(), result: result_text, evidence_refs };
    }
    if let Some(call) = extract_signal_call(&result.tool_calls, SIGNAL_ASK_USER) {
        let question = call.arguments.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let options = sanitize_ask_user_options(string_array(&call.arguments, "options"));
        return StepClassification::AskUser { question, options };
    }

    let normal: Vec<ToolCall> = result.tool_calls.iter().filter(|c| !is_signal_tool(&c.tool_name)).cloned().collect();
    if !normal.is_empty() {
        return StepClassification::ToolCalls(normal);
    }

    match result.finish_reason {
        FinishReason::Length => StepClassification::Backpressure(BackpressureKind::Length),
        FinishReason::ToolCalls | FinishReason::Unknown => {
            StepClassification::Backpressure(BackpressureKind::ToolCallsOrUnknownNoParsed)
        }
        _ if result.text.trim().is_empty() => StepClassification::Backpressure(BackpressureKind::NoTextNoCalls),
        _ => StepClassification::Backpressure(BackpressureKind::TextNoCalls),
    }
}

enum CallOutcome {
    Dispatch(ToolCall),
    Aborted(String, ToolResult),
    Escalate(ToolCall),
}

/// Outcome of a tool-calls step: either the run keeps going (with an
/// optional overlay for the next turn), or a guard-originated ask-user
/// gate passed and the run terminates.
enum ToolCallStepOutcome {
    Continue(Option<ExceptionOverlay>),
    Terminate(FinalizationReason),
}

fn classify_calls_against_doom_loop(calls: &[ToolCall], tracker: &mut SignatureTracker, config: &GuardConfig) -> Vec<CallOutcome> {
    calls
        .iter()
        .map(|c| {
            let signature = guards::tool_call_signature(&c.tool_name, &c.arguments);
            match tracker.record(&signature, config) {
                DoomLoopVerdict::Proceed => CallOutcome::Dispatch(c.clone()),
                DoomLoopVerdict::Abort => CallOutcome::Aborted(
                    signature,
                    ToolResult::aborted(c.call_id.clone(), c.tool_name.clone(), "guard.doom_loop"),
                ),
                DoomLoopVerdict::Escalate => CallOutcome::Escalate(c.clone()),
            }
        })
        .collect()
}

/// §4.2.1: +1 for an argument_error with no success, +2 for a repeated
/// previously-failed signature with no success, else 0.
fn mistake_delta(results: &[ToolResult], repeated_failed_signature: bool) -> i32 {
    if results.iter().any(|r| r.status == ToolStatus::Success) {
        return 0;
    }
    if repeated_failed_signature {
        2
    } else if results.iter().any(|r| matches!(&r.error, Some(e) if e.code == ToolErrorCode::ArgumentError)) {
        1
    } else {
        0
    }
}

fn recovery_overlay(step_n: u32, last_failure: &str, last_signature: &str) -> ExceptionOverlay {
    ExceptionOverlay(format!(
        "[RECOVERY] Step {step_n}/5\nLast failure: {last_failure}\nDo NOT repeat signature: {last_signature}\nYou MUST choose one action from: repair args | switch tool | ask_user | summarize safe status."
    ))
}

fn backpressure_overlay(kind: BackpressureKind) -> ExceptionOverlay {
    let text = match kind {
        BackpressureKind::Length => "[BACKPRESSURE] Your previous response was cut off by the length limit. Continue from where you left off without repeating earlier content.",
        BackpressureKind::ToolCallsOrUnknownNoParsed => "[BACKPRESSURE] No tool calls were recognized in your last turn. Re-issue the call with valid arguments, or call task_complete / ask_user.",
        BackpressureKind::NoTextNoCalls => "[BACKPRESSURE] Your last turn produced neither text nor a tool call. Take a concrete next action.",
        BackpressureKind::TextNoCalls => "[BACKPRESSURE] You have not used any tools yet. If the task requires investigation or action, use a tool; otherwise call task_complete.",
    };
    ExceptionOverlay(text.to_string())
}

fn recovery_mode(mode: RunMode) -> PromptRunMode {
    match mode {
        RunMode::Plan => PromptRunMode::Plan,
        RunMode::Act => PromptRunMode::Act,
    }
}

fn scheduler_mode(mode: RunMode) -> SchedulerMode {
    match mode {
        RunMode::Plan => SchedulerMode::Plan,
        RunMode::Act => SchedulerMode::Act,
    }
}

/// Owns `RuntimeState` and the message history for one run; mutated only
/// from within [`TurnController::run_native`].
pub struct TurnController {
    pub state: RuntimeState,
    pub store: MessageStore,
    tracker: SignatureTracker,
    budget: RunBudgetConfig,
    guard_config: GuardConfig,
    compaction_config: CompactionConfig,
    todo_policy: TodoPolicyConfig,
    options: RunOptions,
    recovery_count: u32,
    no_tool_rounds: u32,
    empty_result_streak: u32,
    last_signature: String,
    last_failure: String,
}

impl TurnController {
    pub fn new(
        state: RuntimeState,
        store: MessageStore,
        budget: RunBudgetConfig,
        guard_config: GuardConfig,
        compaction_config: CompactionConfig,
        todo_policy: TodoPolicyConfig,
        options: RunOptions,
    ) -> Self {
        Self {
            state,
            store,
            tracker: SignatureTracker::new(),
            budget,
            guard_config,
            compaction_config,
            todo_policy,
            options,
            recovery_count: 0,
            no_tool_rounds: 0,
            empty_result_streak: 0,
            last_signature: String::new(),
            last_failure: String::new(),
        }
    }

    fn guard_mode(&self) -> guards::RunMode {
        self.options.mode
    }

    fn maybe_compact(&mut self) {
        let tools: Vec<ToolDefinition> = vec![];
        let estimated = estimate_tokens(self.store.as_slice(), &tools, self.options.token_factor);
        let p = pressure(estimated, self.options.context_limit);
        if compact::should_compact(p, &self.compaction_config) {
            if let Some(new_messages) = compact::run_compaction(self.store.as_slice(), &self.compaction_config) {
                self.store.replace_all(new_messages);
            }
        }
    }

    fn active_provider_tools(&self, registry: &dyn ToolRegistry) -> Vec<ToolDefinition> {
        let mut tools = scheduler::active_tools(registry, scheduler_mode(self.options.mode), &[]);
        tools.push(task_complete_definition());
        tools.push(ask_user_definition());
        tools
    }

    fn build_system_message(&self, tool_defs: &[ToolDefinition], round: u32, overlay: Option<&ExceptionOverlay>) -> Message {
        let tool_names: Vec<String> = tool_defs.iter().map(|t| t.name.clone()).collect();
        let ctx = RuntimeContext {
            working_dir: &self.options.working_dir,
            round,
            mode: recovery_mode(self.options.mode),
            complexity: PromptComplexity::Standard,
            todo_policy: self.todo_policy.mode,
            tool_names: &tool_names,
            objective: &self.options.objective,
        };
        let prompt_text = prompt::compose_system_prompt(&ctx, &self.state, "", overlay);
        Message::system(prompt_text)
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let secs = match attempt {
            1 => 2,
            2 => 4,
            _ => 8,
        };
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    /// Drive the bounded step loop to completion. Entry point for a run.
    /// `approval` is consulted only when `require_user_confirm_on_task_complete`
    /// is set; a forced completion never waits on it (§4.2.6 is a hard
    /// safety net, not a place to block on user input).
    pub async fn run_native(
        &mut self,
        provider: &dyn LlmProvider,
        registry: &dyn ToolRegistry,
        cancel: &CancelToken,
        approval: Option<&dyn ApprovalSink>,
    ) -> FinalizationReason {
        let mut overlay: Option<ExceptionOverlay> = None;
        let mut step: u32 = 0;

        loop {
            if cancel.is_canceled() {
                return match cancel.reason() {
                    Some(CancelReason::Canceled) | None => FinalizationReason::Canceled,
                    Some(CancelReason::TimedOut) => FinalizationReason::TimedOut,
                    Some(CancelReason::Disconnected) => FinalizationReason::Disconnected,
                };
            }

            if step as usize >= self.budget.hard_max_steps {
                return self.forced_completion(provider, cancel, "hard_max_steps").await;
            }

            self.maybe_compact();

            let tool_defs = self.active_provider_tools(registry);
            let system_message = self.build_system_message(&tool_defs, step, overlay.as_ref());
            overlay = None;

            let mut messages = vec![system_message];
            messages.extend(self.store.as_slice().iter().cloned());

            let request = TurnRequest::new(self.options.model.clone(), messages, tool_defs.clone());
            let stream = match provider.stream_turn(&request, cancel).await {
                Ok(s) => s,
                Err(al_domain::Error::Canceled(_)) => return FinalizationReason::Canceled,
                Err(e) => {
                    if let Some(reason) = self.record_provider_failure(&e.to_string()) {
                        return reason;
                    }
                    self.sleep_backoff(self.recovery_count).await;
                    overlay = Some(recovery_overlay(self.recovery_count, &self.last_failure, &self.last_signature));
                    step += 1;
                    continue;
                }
            };

            let turn_result = match aggregate_turn(stream).await {
                Ok(r) => r,
                Err(e) => {
                    if let Some(reason) = self.record_provider_failure(&e.to_string()) {
                        return reason;
                    }
                    self.sleep_backoff(self.recovery_count).await;
                    overlay = Some(recovery_overlay(self.recovery_count, &self.last_failure, &self.last_signature));
                    step += 1;
                    continue;
                }
            };
            self.recovery_count = 0;

            match classify_step(&turn_result) {
                StepClassification::ToolCalls(calls) => {
                    match self.handle_tool_calls(&turn_result, calls, registry).await {
                        ToolCallStepOutcome::Terminate(reason) => return reason,
                        ToolCallStepOutcome::Continue(o) => overlay = o,
                    }
                }
                StepClassification::AskUser { question, options } => {
                    match guards::evaluate_ask_user_gate(&question, &self.state, self.guard_mode(), AskUserOrigin::Model) {
                        Ok(()) => return FinalizationReason::AskUserWaitingModel,
                        Err(rejection) => {
                            let _ = options;
                            self.store.push(Message::assistant(format!("ask_user rejected: {:?}", rejection)));
                            overlay = Some(recovery_overlay(self.recovery_count + 1, "ask_user rejected", &self.last_signature));
                        }
                    }
                }
                StepClassification::TaskComplete { call_id, result, evidence_refs } => {
                    let result_text = if result.trim().is_empty() { turn_result.text.clone() } else { result };
                    if result_text.trim().is_empty() {
                        self.empty_result_streak += 1;
                        if self.empty_result_streak >= 3 {
                            return FinalizationReason::AskUserWaitingGuard { reason: "completion_empty_result_repeated" };
                        }
                        overlay = Some(recovery_overlay(self.recovery_count + 1, "empty task_complete result", &self.last_signature));
                    } else {
                        self.empty_result_streak = 0;
                        let _ = evidence_refs;

                        if self.options.require_user_confirm_on_task_complete {
                            if let Some(sink) = approval {
                                match sink.wait_for_tool_approval(&call_id, self.budget.approval_timeout_secs).await {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        self.store.push(Message::assistant("task_complete rejected by user".to_string()));
                                        overlay = Some(recovery_overlay(self.recovery_count + 1, "task_complete rejected by user", &self.last_signature));
                                        step += 1;
                                        continue;
                                    }
                                    Err(e) => {
                                        self.store.push(Message::assistant(format!("task_complete approval unavailable: {e}")));
                                        overlay = Some(recovery_overlay(self.recovery_count + 1, "task_complete approval unavailable", &self.last_signature));
                                        step += 1;
                                        continue;
                                    }
                                }
                            }
                        }

                        match guards::evaluate_task_completion_gate(&result_text, &self.state, self.guard_mode()) {
                            Ok(()) => return FinalizationReason::TaskComplete,
                            Err(rejection) => {
                                self.store.push(Message::assistant(format!("task_complete rejected: {:?}", rejection)));
                                overlay = Some(recovery_overlay(self.recovery_count + 1, "task_complete rejected", &self.last_signature));
                            }
                        }
                    }
                }
                StepClassification::Backpressure(kind) => {
                    if let Some(reason) = self.handle_backpressure(kind, provider, cancel).await {
                        return reason;
                    }
                    overlay = Some(backpressure_overlay(kind));
                }
            }

            step += 1;
        }
    }

    fn record_provider_failure(&mut self, message: &str) -> Option<FinalizationReason> {
        self.recovery_count += 1;
        self.last_failure = message.to_string();
        if self.recovery_count >= 5 {
            Some(FinalizationReason::AskUserWaitingGuard { reason: "provider_repeated_error" })
        } else {
            None
        }
    }

    async fn handle_tool_calls(&mut self, turn_result: &TurnResult, calls: Vec<ToolCall>, registry: &dyn ToolRegistry) -> ToolCallStepOutcome {
        let outcomes = classify_calls_against_doom_loop(&calls, &mut self.tracker, &self.guard_config);

        let mut to_dispatch = Vec::new();
        let mut results: Vec<ToolResult> = Vec::new();
        let mut escalated = false;

        for outcome in outcomes {
            match outcome {
                CallOutcome::Dispatch(call) => to_dispatch.push(call),
                CallOutcome::Aborted(signature, result) => {
                    self.state.push_no_progress_signature(signature);
                    results.push(result);
                }
                CallOutcome::Escalate(call) => {
                    to_dispatch.push(call);
                    escalated = true;
                }
            }
        }

        let dispatched = scheduler::dispatch(registry, &to_dispatch).await;
        results.extend(dispatched);

        for result in &results {
            let entry = match result.status {
                ToolStatus::Success => LedgerEntry::Completed,
                ToolStatus::Error => LedgerEntry::Failed,
                ToolStatus::Aborted => LedgerEntry::Aborted,
            };
            self.state.record_ledger(&result.tool_id, LedgerEntry::Dispatched);
            self.state.record_ledger(&result.tool_id, entry);
            match result.status {
                ToolStatus::Success => self.state.push_completed_fact(format!("{}: {}", result.tool_name, result.summary)),
                _ => self
                    .state
                    .push_blocked_fact(format!("{}: {}", result.tool_name, result.details.clone().unwrap_or_default())),
            }
        }

        let assistant = Message::assistant_with_tool_calls(&turn_result.text, &calls);
        let tool_messages: Vec<Message> = results.iter().map(Message::tool_result).collect();
        self.store.append_step(assistant, tool_messages);

        let delta = mistake_delta(&results, false);
        if delta > 0 {
            self.state.push_mistake(delta);
        }

        if escalated || self.state.mistake_sum() >= self.guard_config.mistake_threshold {
            let reason = if escalated { "guard_doom_loop" } else { "tool_mistake_loop" };
            return match guards::evaluate_ask_user_gate(reason, &self.state, self.guard_mode(), AskUserOrigin::Guard) {
                Ok(()) => ToolCallStepOutcome::Terminate(FinalizationReason::AskUserWaitingGuard { reason }),
                Err(_) => ToolCallStepOutcome::Continue(Some(recovery_overlay(
                    self.recovery_count + 1,
                    reason,
                    &self.last_signature,
                ))),
            };
        }

        ToolCallStepOutcome::Continue(None)
    }

    async fn handle_backpressure(&mut self, kind: BackpressureKind, provider: &dyn LlmProvider, cancel: &CancelToken) -> Option<FinalizationReason> {
        match kind {
            BackpressureKind::NoTextNoCalls => {
                self.state.push_mistake(1);
                if self.state.mistake_sum() >= self.guard_config.mistake_threshold {
                    return Some(FinalizationReason::AskUserWaitingGuard { reason: "tool_mistake_loop" });
                }
            }
            BackpressureKind::TextNoCalls => {
                self.no_tool_rounds += 1;
                if self.no_tool_rounds as usize > self.budget.max_no_tool_rounds {
                    return Some(self.forced_completion(provider, cancel, "missing_explicit_completion").await);
                }
            }
            BackpressureKind::Length | BackpressureKind::ToolCallsOrUnknownNoParsed => {}
        }
        None
    }

    /// §4.2.3 "above max" / §4.2.6 hard safety net: one single-tool turn
    /// exposing only `task_complete`.
    async fn forced_completion(&mut self, provider: &dyn LlmProvider, cancel: &CancelToken, fail_reason: &'static str) -> FinalizationReason {
        let tool_defs = vec![task_complete_definition()];
        let system_message = self.build_system_message(&tool_defs, u32::MAX, None);
        let mut messages = vec![system_message];
        messages.extend(self.store.as_slice().iter().cloned());

        let request = TurnRequest::new(self.options.model.clone(), messages, tool_defs);
        let stream = match provider.stream_turn(&request, cancel).await {
            Ok(s) => s,
            Err(_) => return FinalizationReason::AskUserWaitingGuard { reason: fail_reason },
        };
        let turn_result = match aggregate_turn(stream).await {
            Ok(r) => r,
            Err(_) => return FinalizationReason::AskUserWaitingGuard { reason: fail_reason },
        };

        if let StepClassification::TaskComplete { result, .. } = classify_step(&turn_result) {
            let result_text = if result.trim().is_empty() { turn_result.text.clone() } else { result };
            if !result_text.trim().is_empty() {
                return if fail_reason == "hard_max_steps" {
                    FinalizationReason::TaskComplete
                } else {
                    FinalizationReason::TaskCompleteForced
                };
            }
        }
        FinalizationReason::AskUserWaitingGuard { reason: fail_reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageStore, GENERIC_TOKEN_FACTOR};
    use crate::test_support::{StubApprovalSink, StubRegistry};
    use al_domain::config::TodoPolicyMode;
    use al_domain::stream::{SourceRef, StreamEvent, Usage};
    use al_providers::test_support::ScriptedProvider;

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall { call_id: id.into(), tool_name: name.into(), arguments: args }
    }

    fn turn_result(tool_calls: Vec<ToolCall>, text: &str, finish_reason: FinishReason) -> TurnResult {
        TurnResult {
            finish_reason,
            text: text.to_string(),
            reasoning: String::new(),
            tool_calls,
            usage: Usage::default(),
            sources: Vec::<SourceRef>::new(),
            raw_diag: None,
        }
    }

    #[test]
    fn classify_step_prefers_task_complete_over_normal_calls() {
        let calls = vec![
            call("a", "terminal.exec", serde_json::json!({"cmd": "ls"})),
            call("b", "task_complete", serde_json::json!({"result": "done"})),
        ];
        let result = turn_result(calls, "", FinishReason::ToolCalls);
        match classify_step(&result) {
            StepClassification::TaskComplete { result, .. } => assert_eq!(result, "done"),
            _ => panic!("expected TaskComplete"),
        }
    }

    #[test]
    fn classify_step_recognizes_ask_user_and_caps_options() {
        let options = serde_json::json!(["a", "a", "b", "c", "d", "e"]);
        let calls = vec![call("a", "ask_user", serde_json::json!({"question": "which env?", "options": options}))];
        let result = turn_result(calls, "", FinishReason::ToolCalls);
        match classify_step(&result) {
            StepClassification::AskUser { question, options } => {
                assert_eq!(question, "which env?");
                assert_eq!(options.len(), 4);
            }
            _ => panic!("expected AskUser"),
        }
    }

    #[test]
    fn classify_step_normal_tool_calls_excludes_signal_tools() {
        let calls = vec![call("a", "terminal.exec", serde_json::json!({}))];
        let result = turn_result(calls, "", FinishReason::ToolCalls);
        match classify_step(&result) {
            StepClassification::ToolCalls(calls) => assert_eq!(calls.len(), 1),
            _ => panic!("expected ToolCalls"),
        }
    }

    #[test]
    fn classify_step_length_finish_reason_is_backpressure() {
        let result = turn_result(vec![], "truncated...", FinishReason::Length);
        assert!(matches!(classify_step(&result), StepClassification::Backpressure(BackpressureKind::Length)));
    }

    #[test]
    fn classify_step_plain_text_with_no_calls_is_text_no_calls() {
        let result = turn_result(vec![], "here is my answer", FinishReason::Stop);
        assert!(matches!(classify_step(&result), StepClassification::Backpressure(BackpressureKind::TextNoCalls)));
    }

    #[test]
    fn doom_loop_second_occurrence_aborts_third_escalates() {
        let config = GuardConfig::default();
        let mut tracker = SignatureTracker::new();
        let calls = vec![call("a", "terminal.exec", serde_json::json!({"cmd": "ls"}))];

        let first = classify_calls_against_doom_loop(&calls, &mut tracker, &config);
        assert!(matches!(first[0], CallOutcome::Dispatch(_)));

        let second = classify_calls_against_doom_loop(&calls, &mut tracker, &config);
        assert!(matches!(second[0], CallOutcome::Aborted(_, _)));

        let third = classify_calls_against_doom_loop(&calls, &mut tracker, &config);
        assert!(matches!(third[0], CallOutcome::Escalate(_)));
    }

    #[test]
    fn mistake_delta_is_zero_when_any_call_succeeds() {
        let results = vec![ToolResult::ok("a", "exec", "ok"), ToolResult::error("b", "exec", "fail", ToolError {
            code: ToolErrorCode::ArgumentError,
            message: "bad arg".into(),
            retryable: true,
            suggested_fixes: vec![],
        })];
        assert_eq!(mistake_delta(&results, false), 0);
    }

    #[test]
    fn mistake_delta_is_two_for_repeated_failed_signature() {
        let results = vec![ToolResult::error("a", "exec", "fail", ToolError {
            code: ToolErrorCode::Timeout,
            message: "timed out".into(),
            retryable: true,
            suggested_fixes: vec![],
        })];
        assert_eq!(mistake_delta(&results, true), 2);
    }

    #[test]
    fn sanitize_ask_user_options_trims_and_dedupes() {
        let options = vec![" keep going ".to_string(), "keep going".to_string(), "stop".to_string()];
        let sanitized = sanitize_ask_user_options(options);
        assert_eq!(sanitized, vec!["keep going".to_string(), "stop".to_string()]);
    }

    fn test_options(require_confirm: bool) -> RunOptions {
        RunOptions {
            mode: RunMode::Act,
            intent: Intent::Task,
            model: "scripted/demo".into(),
            context_limit: 128_000,
            token_factor: GENERIC_TOKEN_FACTOR,
            working_dir: "/workspace".into(),
            objective: "test objective".into(),
            require_user_confirm_on_task_complete: require_confirm,
        }
    }

    fn test_state() -> RuntimeState {
        RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0)
    }

    fn task_complete_script(result: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallStart { call_id: "tc1".into(), tool_name: SIGNAL_TASK_COMPLETE.into() },
            StreamEvent::ToolCallEnd {
                call_id: "tc1".into(),
                tool_name: SIGNAL_TASK_COMPLETE.into(),
                arguments: serde_json::json!({"result": result}),
            },
            StreamEvent::FinishReason { reason: FinishReason::ToolCalls },
        ]
    }

    #[tokio::test]
    async fn task_complete_finishes_immediately_when_approval_granted() {
        let provider = ScriptedProvider::new("scripted", vec![task_complete_script("done")]);
        let registry = StubRegistry::new(vec![]);
        let mut controller = TurnController::new(
            test_state(),
            MessageStore::new(),
            RunBudgetConfig::default(),
            GuardConfig::default(),
            CompactionConfig::default(),
            TodoPolicyConfig::default(),
            test_options(true),
        );
        let cancel = CancelToken::new();
        let approval = StubApprovalSink::approving();

        let reason = controller.run_native(&provider, &registry, &cancel, Some(&approval)).await;
        assert_eq!(reason, FinalizationReason::TaskComplete);
    }

    fn exec_call_script() -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallStart { call_id: "c1".into(), tool_name: "terminal.exec".into() },
            StreamEvent::ToolCallEnd {
                call_id: "c1".into(),
                tool_name: "terminal.exec".into(),
                arguments: serde_json::json!({"cmd": "ls"}),
            },
            StreamEvent::FinishReason { reason: FinishReason::ToolCalls },
        ]
    }

    #[tokio::test]
    async fn third_identical_call_ends_the_run_with_ask_user_waiting_guard() {
        let provider = ScriptedProvider::new(
            "scripted",
            vec![exec_call_script(), exec_call_script(), exec_call_script()],
        );
        let registry = StubRegistry::new(vec![ToolDefinition {
            name: "terminal.exec".into(),
            description: "".into(),
            parameters: serde_json::json!({}),
            mutating: true,
        }]);
        let mut controller = TurnController::new(
            test_state(),
            MessageStore::new(),
            RunBudgetConfig::default(),
            GuardConfig::default(),
            CompactionConfig::default(),
            TodoPolicyConfig::default(),
            test_options(false),
        );
        let cancel = CancelToken::new();

        let reason = controller.run_native(&provider, &registry, &cancel, None).await;
        assert_eq!(reason, FinalizationReason::AskUserWaitingGuard { reason: "guard_doom_loop" });
    }

    #[tokio::test]
    async fn task_complete_rejection_continues_the_loop_instead_of_finishing() {
        let provider = ScriptedProvider::new(
            "scripted",
            vec![task_complete_script("done"), task_complete_script("done-again")],
        );
        let registry = StubRegistry::new(vec![]);
        let budget = RunBudgetConfig { hard_max_steps: 1, ..RunBudgetConfig::default() };
        let mut controller = TurnController::new(
            test_state(),
            MessageStore::new(),
            budget,
            GuardConfig::default(),
            CompactionConfig::default(),
            TodoPolicyConfig::default(),
            test_options(true),
        );
        let cancel = CancelToken::new();
        let approval = StubApprovalSink::rejecting();

        let reason = controller.run_native(&provider, &registry, &cancel, Some(&approval)).await;
        // hard_max_steps forces the safety-net completion, whose own
        // task_complete is not gated behind approval.
        assert_eq!(reason, FinalizationReason::TaskComplete);
        assert!(controller.store.as_slice().iter().any(|m| format!("{m:?}").contains("rejected by user")));
    }
}
