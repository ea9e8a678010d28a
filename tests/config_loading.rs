use std::io::Write;

use conductor_core::config::AppConfig;
use conductor_core::error::ConductorError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet"
max_tokens = 2048
temperature = 0.5

[models.classifier]
model_id = "gpt-4o-mini"
temperature = 0.0
top_p = 0.9

[rate_gate]
requests_per_minute = 30
tokens_per_minute = 40000
max_check_secs = 2

[turn]
max_follow_up_rounds = 4
nudge_on_missing_tools = false
action_keywords = ["ship", "set up"]

[heap]
depth_limit = 3
context_cap = 6

[node_agent]
max_tool_rounds = 8
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet");
    assert_eq!(config.model.max_tokens, 2048);

    let classifier = config.model_by_id("classifier").expect("named model");
    assert_eq!(classifier.temperature, 0.0);
    assert_eq!(classifier.top_p, Some(0.9));
    assert_eq!(classifier.provider, "openai");

    assert_eq!(config.rate_gate.requests_per_minute, 30);
    assert_eq!(config.rate_gate.tokens_per_minute, 40_000);
    assert_eq!(config.rate_gate.max_check_secs, 2);
    assert_eq!(config.rate_gate.window_secs, 60);

    assert_eq!(config.turn.max_follow_up_rounds, 4);
    assert!(!config.turn.nudge_on_missing_tools);
    assert!(config.turn.nudge_on_incomplete_plan);
    assert_eq!(config.turn.action_keywords, vec!["ship", "set up"]);

    assert_eq!(config.heap.depth_limit, 3);
    assert_eq!(config.heap.context_cap, 6);
    assert_eq!(config.node_agent.max_tool_rounds, 8);
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("CONDUCTOR_IT_MODEL", "env-model");
    let (_dir, path) = conductor_test_utils::write_config(
        r#"
[model]
model_id = "${CONDUCTOR_IT_MODEL}"
"#,
    );

    let config = AppConfig::load(&path).expect("load config");
    assert_eq!(config.model.model_id, "env-model");
    std::env::remove_var("CONDUCTOR_IT_MODEL");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConductorError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.heap.depth_limit, 5);
    assert_eq!(config.turn.max_follow_up_rounds, 2);
}

#[test]
fn test_config_round_trips_through_toml() {
    let (_dir, path) = conductor_test_utils::write_config("[heap]\ncontext_cap = 4\n");
    let config = AppConfig::load(&path).expect("load config");

    let printed = toml::to_string_pretty(&config).expect("serialize");
    let reparsed = AppConfig::from_toml(&printed).expect("reparse");
    assert_eq!(reparsed.heap.context_cap, 4);
    assert_eq!(reparsed.model.model_id, config.model.model_id);
}
