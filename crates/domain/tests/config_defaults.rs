use al_domain::config::{RunConfig, TodoPolicyMode};

#[test]
fn default_budget_is_spec_derived() {
    let config = RunConfig::default();
    assert_eq!(config.budget.max_steps, 24);
    assert_eq!(config.budget.hard_max_steps, 200);
}

#[test]
fn explicit_partial_config_overrides_only_named_fields() {
    let toml_str = r#"
[budget]
max_steps = 5

[todo_policy]
mode = "required"
minimum_items = 3
"#;
    let config: RunConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.budget.max_steps, 5);
    assert_eq!(config.budget.max_no_tool_rounds, 3);
    assert_eq!(config.todo_policy.mode, TodoPolicyMode::Required);
    assert_eq!(config.todo_policy.minimum_items, 3);
}
