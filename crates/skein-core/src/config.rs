use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound on node visits within one run of the loop (per branch).
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Maximum visits of any single node; 0 disables the check.
    #[serde(default)]
    pub max_visits_per_node: usize,
    /// How often a waiting join re-checks its deadline.
    #[serde(default = "default_join_poll_interval_ms")]
    pub join_poll_interval_ms: u64,
    /// Deadline for joins that do not set their own timeout; 0 means none.
    #[serde(default)]
    pub default_join_timeout_ms: u64,
    /// Check edge conditions on traverse and fork.
    #[serde(default = "default_enforce_edge_conditions")]
    pub enforce_edge_conditions: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_visits_per_node: 0,
            join_poll_interval_ms: default_join_poll_interval_ms(),
            default_join_timeout_ms: 0,
            enforce_edge_conditions: default_enforce_edge_conditions(),
        }
    }
}

impl ExecutionConfig {
    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms.max(1))
    }

    pub fn default_join_timeout(&self) -> Option<Duration> {
        (self.default_join_timeout_ms > 0)
            .then(|| Duration::from_millis(self.default_join_timeout_ms))
    }

    pub fn visit_limit(&self) -> Option<usize> {
        (self.max_visits_per_node > 0).then_some(self.max_visits_per_node)
    }
}

fn default_max_steps() -> usize { 10_000 }
fn default_join_poll_interval_ms() -> u64 { 25 }
fn default_enforce_edge_conditions() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Whether `resume` rejects states whose node is gone from the graph.
    #[serde(default = "default_strict_resume")]
    pub strict: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            strict: default_strict_resume(),
        }
    }
}

fn default_strict_resume() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

fn default_event_bus_capacity() -> usize { 256 }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WorkflowError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text, expanding `${ENV_VAR}` references first.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| WorkflowError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.execution.max_steps == 0 {
            return Err(WorkflowError::Config("execution.max_steps must be > 0".into()));
        }
        if self.monitor.event_bus_capacity == 0 {
            return Err(WorkflowError::Config(
                "monitor.event_bus_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_SKEIN_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_SKEIN_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_SKEIN_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_SKEIN_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_SKEIN_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.execution.max_steps, 10_000);
        assert_eq!(config.execution.visit_limit(), None);
        assert_eq!(config.execution.default_join_timeout(), None);
        assert_eq!(config.execution.join_poll_interval(), Duration::from_millis(25));
        assert!(config.execution.enforce_edge_conditions);
        assert!(config.resume.strict);
        assert_eq!(config.monitor.event_bus_capacity, 256);
    }

    #[test]
    fn test_partial_override() {
        let toml_str = r#"
[execution]
max_visits_per_node = 3
default_join_timeout_ms = 500

[resume]
strict = false
"#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.execution.visit_limit(), Some(3));
        assert_eq!(
            config.execution.default_join_timeout(),
            Some(Duration::from_millis(500))
        );
        assert!(!config.resume.strict);
        assert_eq!(config.execution.max_steps, 10_000);
    }

    #[test]
    fn test_zero_max_steps_rejected() {
        let err = EngineConfig::from_toml_str("[execution]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = EngineConfig::from_toml_str("[execution\nmax_steps = ").unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
    }
}
