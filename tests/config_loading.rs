use std::io::Write;
use std::time::Duration;

use skein::prelude::*;
use skein_test_utils::{node_id, workflow_id, write_config};

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[execution]
max_steps = 500
max_visits_per_node = 4
join_poll_interval_ms = 10
default_join_timeout_ms = 2500
enforce_edge_conditions = false

[resume]
strict = false

[monitor]
event_bus_capacity = 64
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.execution.max_steps, 500);
    assert_eq!(config.execution.visit_limit(), Some(4));
    assert_eq!(config.execution.join_poll_interval(), Duration::from_millis(10));
    assert_eq!(config.execution.default_join_timeout(), Some(Duration::from_millis(2500)));
    assert!(!config.execution.enforce_edge_conditions);
    assert!(!config.resume.strict);
    assert_eq!(config.monitor.event_bus_capacity, 64);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SKEIN_TEST_MAX_STEPS", "42");

    let (_dir, path) = write_config(
        "skein.toml",
        r#"
[execution]
max_steps = ${SKEIN_TEST_MAX_STEPS}
"#,
    );

    let config = EngineConfig::load(&path).expect("load config");
    assert_eq!(config.execution.max_steps, 42);

    std::env::remove_var("SKEIN_TEST_MAX_STEPS");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let (_dir, path) = write_config("skein.toml", "[monitor]\n");

    let config = EngineConfig::load(&path).expect("load config");

    assert_eq!(config.execution.max_steps, 10_000);
    assert_eq!(config.execution.visit_limit(), None);
    assert_eq!(config.execution.default_join_timeout(), None);
    assert!(config.execution.enforce_edge_conditions);
    assert!(config.resume.strict);
    assert_eq!(config.monitor.event_bus_capacity, 256);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = EngineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, WorkflowError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    let (_dir, path) = write_config("skein.toml", "[monitor]\nevent_bus_capacity = 0\n");
    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, WorkflowError::Config(_)));
}

#[tokio::test]
async fn test_loaded_config_drives_resume_mode() {
    let (_dir, path) = write_config("skein.toml", "[resume]\nstrict = false\n");
    let config = EngineConfig::load(&path).expect("load config");

    let workflow: GraphWorkflow<u32, u32> = GraphWorkflowBuilder::new()
        .add_node(
            GraphWorkflowNode::from_sync_fn(node_id("only"), |s: &GraphWorkflowState<u32>| {
                Ok(GraphCommand::complete().with_data(s.data() + 1))
            })
            .as_entry_point(),
        )
        .output_extractor(|s: &GraphWorkflowState<u32>| *s.data())
        .configuration(config)
        .build()
        .expect("build");

    // A state from some other graph restarts at the entry point instead of failing.
    let stale = GraphWorkflowState::initial(
        workflow_id("wf-stale"),
        1,
        WorkflowContext::new(),
        node_id("retired"),
    );
    let result = workflow.resume(stale).await;
    assert_eq!(result.output(), Some(&2));
}
