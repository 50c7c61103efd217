use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run-local tunables owned by the agent loop core. Production config
/// concerns (provider credentials, skill catalogs, server topology) live
/// outside this crate and are resolved by external collaborators before
/// a `RunConfig` is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub budget: RunBudgetConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub todo_policy: TodoPolicyConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBudgetConfig {
    /// Soft step cap; the loop is task-driven and normally terminates
    /// well before this via a signal tool.
    #[serde(default = "d_24")]
    pub max_steps: usize,
    /// Absolute step cap (§4.2.6 hard safety net). Never configurable
    /// above this from a run's own options.
    #[serde(default = "d_200")]
    pub hard_max_steps: usize,
    #[serde(default = "d_3")]
    pub max_no_tool_rounds: usize,
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub wall_time_limit_secs: Option<u64>,
    #[serde(default = "d_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

impl Default for RunBudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: d_24(),
            hard_max_steps: d_200(),
            max_no_tool_rounds: d_3(),
            max_input_tokens: None,
            max_output_tokens: None,
            max_cost_usd: None,
            idle_timeout_secs: d_idle_timeout_secs(),
            wall_time_limit_secs: None,
            approval_timeout_secs: d_approval_timeout_secs(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-pressure-driven context compaction, not turn-count-driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Fraction of the context window that triggers compaction.
    #[serde(default = "d_pressure_threshold")]
    pub pressure_threshold: f64,
    /// Messages kept verbatim after compaction.
    #[serde(default = "d_10")]
    pub keep_last_messages: usize,
    /// Rune cap for a kept tool_result payload before truncation.
    #[serde(default = "d_500")]
    pub tool_result_truncate_runes: usize,
    /// Max summary lines describing the archived prefix.
    #[serde(default = "d_12")]
    pub summary_max_lines: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            pressure_threshold: d_pressure_threshold(),
            keep_last_messages: d_10(),
            tool_result_truncate_runes: d_500(),
            summary_max_lines: d_12(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Signature hit count at which a call is aborted instead of dispatched.
    #[serde(default = "d_2")]
    pub doom_loop_abort_at: u32,
    /// Signature hit count at which ask-user is invoked.
    #[serde(default = "d_3")]
    pub doom_loop_escalate_at: u32,
    /// Sliding window size for mistake accounting.
    #[serde(default = "d_8")]
    pub mistake_window_cap: usize,
    /// Sum of the mistake window that triggers ask-user.
    #[serde(default = "d_3")]
    pub mistake_threshold: i32,
    #[serde(default = "d_12")]
    pub completed_facts_cap: usize,
    #[serde(default = "d_12")]
    pub blocked_facts_cap: usize,
    #[serde(default = "d_6")]
    pub recent_errors_cap: usize,
    #[serde(default = "d_8")]
    pub no_progress_signatures_cap: usize,
    /// Consecutive recovery failures before ask-user (§4.2.5).
    #[serde(default = "d_5")]
    pub max_recovery_attempts: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            doom_loop_abort_at: d_2(),
            doom_loop_escalate_at: d_3(),
            mistake_window_cap: d_8(),
            mistake_threshold: d_3(),
            completed_facts_cap: d_12(),
            blocked_facts_cap: d_12(),
            recent_errors_cap: d_6(),
            no_progress_signatures_cap: d_8(),
            max_recovery_attempts: d_5(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Todo policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPolicyMode {
    None,
    Recommended,
    Required,
}

impl Default for TodoPolicyMode {
    fn default() -> Self {
        TodoPolicyMode::Recommended
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoPolicyConfig {
    #[serde(default)]
    pub mode: TodoPolicyMode,
    /// Floor on `todo.total_count` when `mode == required`.
    #[serde(default = "d_1")]
    pub minimum_items: usize,
}

impl Default for TodoPolicyConfig {
    fn default() -> Self {
        Self {
            mode: TodoPolicyMode::default(),
            minimum_items: d_1(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_1() -> usize {
    1
}
fn d_2() -> u32 {
    2
}
fn d_3() -> usize {
    3
}
fn d_5() -> u32 {
    5
}
fn d_6() -> usize {
    6
}
fn d_8() -> usize {
    8
}
fn d_10() -> usize {
    10
}
fn d_12() -> usize {
    12
}
fn d_24() -> usize {
    24
}
fn d_200() -> usize {
    200
}
fn d_500() -> usize {
    500
}
fn d_idle_timeout_secs() -> u64 {
    300
}
fn d_approval_timeout_secs() -> u64 {
    600
}
fn d_pressure_threshold() -> f64 {
    0.70
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_matches_spec_defaults() {
        let cfg = RunBudgetConfig::default();
        assert_eq!(cfg.max_steps, 24);
        assert_eq!(cfg.hard_max_steps, 200);
        assert_eq!(cfg.max_no_tool_rounds, 3);
    }

    #[test]
    fn default_compaction_pressure_threshold_is_070() {
        let cfg = CompactionConfig::default();
        assert!((cfg.pressure_threshold - 0.70).abs() < f64::EPSILON);
        assert_eq!(cfg.keep_last_messages, 10);
    }

    #[test]
    fn default_todo_policy_is_recommended() {
        let cfg = TodoPolicyConfig::default();
        assert_eq!(cfg.mode, TodoPolicyMode::Recommended);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml_str = r#"
[budget]
max_steps = 10
"#;
        let cfg: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.budget.max_steps, 10);
        assert_eq!(cfg.budget.hard_max_steps, 200);
        assert_eq!(cfg.compaction.keep_last_messages, 10);
    }
}
