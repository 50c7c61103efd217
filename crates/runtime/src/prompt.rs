//! Prompt Composer (§4.6): assembles the turn's system prompt from fixed
//! and volatile layers joined by blank lines. Regenerated every step —
//! nothing here is cached across steps.

use al_domain::config::TodoPolicyMode;
use al_domain::runtime_state::RuntimeState;

/// Core identity, mandate, and workflow directives. Fixed across every run.
pub const CORE_DIRECTIVES: &str = "\
You are an on-device coding and operations agent. Investigate before you \
act, plan before you commit, verify after you change something, and \
iterate until the task is genuinely done.

Rules:
- Call task_complete when the task is actually finished; do not stop short.
- Use ask_user only for blockers that require information only the user has.
- Prefer autonomy: resolve what tools can resolve without asking.
- Use the workdir field on exec-style tools instead of `cd`.
- Do not wrap a shell invocation in a nested `bash -lc`.
- Use stdin for multi-line scripts rather than escaping newlines.
- Never fabricate tool output; only report what a tool actually returned.

If a tool call fails, read the error, adjust the approach, and retry with a \
repaired argument set or a different tool — do not repeat the same call.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Plan,
    Act,
}

impl RunMode {
    fn label(self) -> &'static str {
        match self {
            RunMode::Plan => "plan",
            RunMode::Act => "act",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl Complexity {
    fn label(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Standard => "standard",
            Complexity::Complex => "complex",
        }
    }
}

fn todo_policy_label(policy: TodoPolicyMode) -> &'static str {
    match policy {
        TodoPolicyMode::None => "none",
        TodoPolicyMode::Recommended => "recommended",
        TodoPolicyMode::Required => "required",
    }
}

/// Everything the runtime-context layer (layer 2) needs, gathered by the
/// turn controller before each step.
pub struct RuntimeContext<'a> {
    pub working_dir: &'a str,
    pub round: u32,
    pub mode: RunMode,
    pub complexity: Complexity,
    pub todo_policy: TodoPolicyMode,
    pub tool_names: &'a [String],
    pub objective: &'a str,
}

fn render_runtime_context(ctx: &RuntimeContext, state: &RuntimeState) -> String {
    let mut tool_names: Vec<&str> = ctx.tool_names.iter().map(|s| s.as_str()).collect();
    tool_names.sort_unstable();

    let mut lines = vec![
        "Runtime context:".to_string(),
        format!("- working_dir: {}", ctx.working_dir),
        format!("- round: {} (first_round: {})", ctx.round, ctx.round == 0),
        format!("- mode: {}", ctx.mode.label()),
        format!("- complexity: {}", ctx.complexity.label()),
        format!("- todo_policy: {}", todo_policy_label(ctx.todo_policy)),
        format!("- available_tools: [{}]", tool_names.join(", ")),
        format!("- objective: {}", ctx.objective),
    ];

    let recent_errors: Vec<&String> = state.recent_errors().collect();
    if !recent_errors.is_empty() {
        lines.push(format!(
            "- recent_errors: [{}]",
            recent_errors.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("; ")
        ));
    }

    lines.push(format!(
        "- todo: enabled={} total={} open={} in_progress={}",
        state.todo.enabled, state.todo.total, state.todo.open, state.todo.in_progress
    ));

    lines.join("\n")
}

const PLAN_MODE_GUIDANCE: &str = "\
Plan mode: mutating tools are unavailable. Investigate, propose a plan, and \
ask for confirmation before any state-changing action. Open todos do not \
block task_complete while in this mode.";

/// Skill catalog / active-skill overlay from the skill manager (external
/// collaborator). Stubbed here: the skill manager's implementation is out
/// of scope, so this is always empty unless a caller supplies content.
pub fn render_skill_overlay(skill_catalog: &str) -> Option<String> {
    if skill_catalog.trim().is_empty() {
        None
    } else {
        Some(skill_catalog.to_string())
    }
}

/// A transient fragment carrying recovery or backpressure guidance for the
/// next turn only (§4.2.5's `[RECOVERY]` templates, §4.2.3's nudges).
pub struct ExceptionOverlay(pub String);

/// Compose the full system prompt: layers 1-5, joined by blank lines.
/// Empty optional layers (skill overlay, exception overlay, plan guidance
/// outside plan mode) are omitted entirely rather than leaving a gap.
pub fn compose_system_prompt(
    ctx: &RuntimeContext,
    state: &RuntimeState,
    skill_catalog: &str,
    overlay: Option<&ExceptionOverlay>,
) -> String {
    let mut layers = vec![CORE_DIRECTIVES.to_string(), render_runtime_context(ctx, state)];

    if ctx.mode == RunMode::Plan {
        layers.push(PLAN_MODE_GUIDANCE.to_string());
    }

    if let Some(skills) = render_skill_overlay(skill_catalog) {
        layers.push(skills);
    }

    if let Some(overlay) = overlay {
        layers.push(overlay.0.clone());
    }

    layers.join("\n\n")
}
