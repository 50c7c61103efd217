//! Doom-loop detection, mistake accounting, todo policy, and the
//! completion/ask-user gates.

use al_domain::config::{GuardConfig, TodoPolicyMode};
use al_domain::runtime_state::{RuntimeState, TodoSnapshot};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize `value` so object keys are sorted lexicographically at
/// every nesting depth, then serialize. Arrays preserve element order.
pub fn canonical_json(value: &Value) -> String {
    fn canon(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), canon(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canon).collect()),
            other => other.clone(),
        }
    }
    canon(value).to_string()
}

/// SHA-256 hex digest of `name || "|" || canonical-json(args)`.
pub fn tool_call_signature(name: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(args).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of checking one call's signature against prior hit counts.
pub enum DoomLoopVerdict {
    /// First occurrence (or below the abort threshold); dispatch normally.
    Proceed,
    /// Hit count reached `doom_loop_abort_at`; synthesize an aborted
    /// result, do not dispatch.
    Abort,
    /// Hit count reached `doom_loop_escalate_at`; invoke the ask-user gate
    /// with reason `guard_doom_loop`.
    Escalate,
}

/// Tracks signature hit counts across a run's lifetime. Owned by the turn
/// controller alongside [`RuntimeState`].
#[derive(Debug, Clone, Default)]
pub struct SignatureTracker {
    hits: std::collections::HashMap<String, u32>,
}

impl SignatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more occurrence of `signature` and classify it.
    pub fn record(&mut self, signature: &str, config: &GuardConfig) -> DoomLoopVerdict {
        let count = self.hits.entry(signature.to_string()).or_insert(0);
        *count += 1;
        if *count >= config.doom_loop_escalate_at {
            DoomLoopVerdict::Escalate
        } else if *count >= config.doom_loop_abort_at {
            DoomLoopVerdict::Abort
        } else {
            DoomLoopVerdict::Proceed
        }
    }
}

/// Reasons `evaluate_task_completion_gate` can reject on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRejection {
    EmptyResult,
    MissingTodosForPolicyRequired,
    InsufficientTodosForPolicyRequired,
    PendingTodos,
}

/// `mode` passed to the completion/ask-user gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Plan,
    Act,
}

fn todo_policy_violation(todo: &TodoSnapshot, policy: TodoPolicyMode, minimum_items: usize) -> Option<CompletionRejection> {
    if policy != TodoPolicyMode::Required {
        return None;
    }
    if !todo.enabled {
        return Some(CompletionRejection::MissingTodosForPolicyRequired);
    }
    if todo.total < minimum_items {
        return Some(CompletionRejection::InsufficientTodosForPolicyRequired);
    }
    None
}

/// §4.4: `evaluate_task_completion_gate(result_text, state, mode)`.
pub fn evaluate_task_completion_gate(result_text: &str, state: &RuntimeState, mode: RunMode) -> Result<(), CompletionRejection> {
    if result_text.trim().is_empty() {
        return Err(CompletionRejection::EmptyResult);
    }
    if let Some(rejection) = todo_policy_violation(&state.todo, state.todo_policy, state.todo_minimum_items) {
        return Err(rejection);
    }
    if state.todo.enabled && state.todo.open > 0 && mode != RunMode::Plan {
        return Err(CompletionRejection::PendingTodos);
    }
    Ok(())
}

/// Reasons `evaluate_ask_user_gate` can reject on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskUserRejection {
    EmptyQuestion,
    DelegatedCollectableWork,
    MissingTodosForPolicyRequired,
    InsufficientTodosForPolicyRequired,
    PendingTodosWithoutBlocker,
}

/// Whether this ask-user call originated from the model or from a guard
/// (doom-loop, mistake-loop, empty-output-repeated, provider-repeated-error,
/// hard-max-steps). Guard-originated calls bypass the delegated-work check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskUserOrigin {
    Model,
    Guard,
}

/// Verb+object phrase fragments (English + a few common languages) that
/// indicate the model is asking the user to do collectable work a tool
/// could do instead (run a command, paste logs, share output).
const DELEGATED_WORK_PATTERNS: &[&str] = &[
    "run this command",
    "run the command",
    "paste the output",
    "paste the logs",
    "share the output",
    "share the logs",
    "copy the output",
    "execute the following",
    "ejecuta el comando",
    "pega la salida",
    "exécute la commande",
    "colle la sortie",
];

fn mentions_delegated_work(question: &str) -> bool {
    let lower = question.to_lowercase();
    DELEGATED_WORK_PATTERNS.iter().any(|p| lower.contains(p))
}

/// §4.4: `evaluate_ask_user_gate(question, state, mode, origin)`.
pub fn evaluate_ask_user_gate(
    question: &str,
    state: &RuntimeState,
    mode: RunMode,
    origin: AskUserOrigin,
) -> Result<(), AskUserRejection> {
    if question.trim().is_empty() {
        return Err(AskUserRejection::EmptyQuestion);
    }
    if origin == AskUserOrigin::Model && mentions_delegated_work(question) {
        return Err(AskUserRejection::DelegatedCollectableWork);
    }
    match todo_policy_violation(&state.todo, state.todo_policy, state.todo_minimum_items) {
        Some(CompletionRejection::MissingTodosForPolicyRequired) => {
            return Err(AskUserRejection::MissingTodosForPolicyRequired)
        }
        Some(CompletionRejection::InsufficientTodosForPolicyRequired) => {
            return Err(AskUserRejection::InsufficientTodosForPolicyRequired)
        }
        _ => {}
    }
    if mode != RunMode::Plan
        && state.todo.enabled
        && state.todo.open > 0
        && state.blocked_facts().next().is_none()
    {
        return Err(AskUserRejection::PendingTodosWithoutBlocker);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::runtime_state::RuntimeState;

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let a = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        let b = serde_json::json!({"a": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn signature_is_stable_under_key_reordering() {
        let a = tool_call_signature("exec", &serde_json::json!({"cmd": "ls", "cwd": "/tmp"}));
        let b = tool_call_signature("exec", &serde_json::json!({"cwd": "/tmp", "cmd": "ls"}));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_tracker_escalates_at_configured_thresholds() {
        let config = GuardConfig::default();
        let mut tracker = SignatureTracker::new();
        assert!(matches!(tracker.record("sig", &config), DoomLoopVerdict::Proceed));
        assert!(matches!(tracker.record("sig", &config), DoomLoopVerdict::Abort));
        assert!(matches!(tracker.record("sig", &config), DoomLoopVerdict::Escalate));
    }

    #[test]
    fn completion_gate_rejects_empty_result() {
        let state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        assert_eq!(evaluate_task_completion_gate("  ", &state, RunMode::Act), Err(CompletionRejection::EmptyResult));
    }

    #[test]
    fn completion_gate_rejects_pending_todos_outside_plan_mode() {
        let mut state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        state.todo.enabled = true;
        state.todo.open = 2;
        assert_eq!(
            evaluate_task_completion_gate("done", &state, RunMode::Act),
            Err(CompletionRejection::PendingTodos)
        );
        assert!(evaluate_task_completion_gate("done", &state, RunMode::Plan).is_ok());
    }

    #[test]
    fn completion_gate_required_policy_blocks_when_todos_disabled() {
        let state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::Required, 1);
        assert_eq!(
            evaluate_task_completion_gate("done", &state, RunMode::Act),
            Err(CompletionRejection::MissingTodosForPolicyRequired)
        );
    }

    #[test]
    fn ask_user_gate_rejects_empty_question() {
        let state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        assert_eq!(
            evaluate_ask_user_gate("", &state, RunMode::Act, AskUserOrigin::Model),
            Err(AskUserRejection::EmptyQuestion)
        );
    }

    #[test]
    fn ask_user_gate_rejects_delegated_work_for_model_origin_only() {
        let state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        let q = "Please run this command and paste the output back to me.";
        assert_eq!(
            evaluate_ask_user_gate(q, &state, RunMode::Act, AskUserOrigin::Model),
            Err(AskUserRejection::DelegatedCollectableWork)
        );
        assert!(evaluate_ask_user_gate(q, &state, RunMode::Act, AskUserOrigin::Guard).is_ok());
    }

    #[test]
    fn ask_user_gate_rejects_pending_todos_without_blocker() {
        let mut state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        state.todo.enabled = true;
        state.todo.open = 1;
        assert_eq!(
            evaluate_ask_user_gate("why?", &state, RunMode::Act, AskUserOrigin::Model),
            Err(AskUserRejection::PendingTodosWithoutBlocker)
        );
        state.push_blocked_fact("waiting on external API access".into());
        assert!(evaluate_ask_user_gate("why?", &state, RunMode::Act, AskUserOrigin::Model).is_ok());
    }
}
