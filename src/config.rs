//! Configuration loading and validation.
//!
//! Configuration is read from a TOML file; every field has a default so an
//! empty file is valid. A few values can be overridden from the environment:
//! - `CODE_AGENT_CONFIG` - path of the TOML file
//! - `CODE_AGENT_TEMPLATE` - sandbox template id
//! - `CODE_AGENT_MODEL` - model name

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::DEFAULT_WORK_DIR;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CODE_AGENT_CONFIG";
const TEMPLATE_ENV: &str = "CODE_AGENT_TEMPLATE";
const MODEL_ENV: &str = "CODE_AGENT_MODEL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
    pub storage: StorageConfig,
}

/// Sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Template the sandbox is created from.
    pub template_id: String,
    /// Lifetime granted at creation; must outlast the longest agent run.
    pub initial_ttl_secs: u64,
    /// Lifetime left after the run completes.
    pub post_completion_ttl_secs: u64,
    /// Port the generated app is served on.
    pub app_port: u16,
    /// Absolute working directory inside the sandbox.
    pub work_dir: String,
    /// Host name in public app URLs.
    pub host: String,
    /// Root directory of local sandboxes.
    pub base_dir: PathBuf,
    /// Directory of local templates, one subdirectory per template id.
    pub template_root: Option<PathBuf>,
    /// Upper bound on a single terminal command.
    pub command_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            template_id: "nextjs-dev".to_string(),
            initial_ttl_secs: 1800,
            post_completion_ttl_secs: 600,
            app_port: 3000,
            work_dir: DEFAULT_WORK_DIR.to_string(),
            host: "localhost".to_string(),
            base_dir: std::env::temp_dir().join("code-agent-sandboxes"),
            template_root: None,
            command_timeout_secs: 300,
        }
    }
}

impl SandboxConfig {
    pub fn initial_ttl(&self) -> Duration {
        Duration::from_secs(self.initial_ttl_secs)
    }

    pub fn post_completion_ttl(&self) -> Duration {
        Duration::from_secs(self.post_completion_ttl_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Agent and model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Maximum agent turns per run.
    pub max_iterations: u32,
    /// Retries for transient model API failures.
    pub max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "code-agent".to_string(),
            model: "grok-4-1-fast-reasoning".to_string(),
            base_url: "https://api.x.ai/v1".to_string(),
            api_key_env: "XAI_API_KEY".to_string(),
            max_iterations: 15,
            max_retries: 3,
        }
    }
}

impl AgentConfig {
    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", self.api_key_env)))
    }
}

/// Where run state is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub journal_dir: PathBuf,
    pub messages_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from(".code-agent/journal"),
            messages_path: PathBuf::from(".code-agent/messages.jsonl"),
        }
    }
}

impl DriveConfig {
    /// Parses a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&raw)
    }

    /// Loads from `CODE_AGENT_CONFIG` if set, otherwise defaults, then applies
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(template) = lookup(TEMPLATE_ENV) {
            self.sandbox.template_id = template;
        }
        if let Some(model) = lookup(MODEL_ENV) {
            self.agent.model = model;
        }
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.template_id.trim().is_empty() {
            result.add_error("template_id cannot be empty");
        }

        // The long window must cover the whole run, the short one only the hand-off.
        if self.initial_ttl_secs <= self.post_completion_ttl_secs {
            result.add_error("initial_ttl_secs must be greater than post_completion_ttl_secs");
        }

        if self.post_completion_ttl_secs == 0 {
            result.add_error("post_completion_ttl_secs must be at least 1");
        }

        if self.app_port == 0 {
            result.add_error("app_port cannot be 0");
        }

        if self.host.trim().is_empty() || self.host.contains('/') {
            result.add_error(format!("host '{}' must be a bare host name", self.host));
        }

        if !self.work_dir.starts_with('/') {
            result.add_error(format!("work_dir '{}' must be absolute", self.work_dir));
        }

        if self.initial_ttl_secs < 300 {
            result.add_warning("initial_ttl_secs under 5 minutes may expire mid-run");
        }

        result
    }
}

impl Validate for AgentConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_iterations == 0 {
            result.add_error("max_iterations must be at least 1");
        }

        if self.max_iterations > 50 {
            result.add_warning("max_iterations > 50 may lead to excessive model calls");
        }

        if self.model.trim().is_empty() {
            result.add_error("model cannot be empty");
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            result.add_error(format!("base_url '{}' must be an http(s) URL", self.base_url));
        }

        result
    }
}

impl Validate for DriveConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = self.sandbox.validate();
        result.merge(self.agent.validate());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = DriveConfig::from_toml("").unwrap();

        assert_eq!(config, DriveConfig::default());
        assert_eq!(config.sandbox.app_port, 3000);
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.sandbox.initial_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn partial_file_overrides_fields() {
        let config = DriveConfig::from_toml(
            r#"
            [sandbox]
            template_id = "vite-dev"
            host = "sandbox.internal"
            post_completion_ttl_secs = 120

            [agent]
            max_iterations = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.sandbox.template_id, "vite-dev");
        assert_eq!(config.sandbox.host, "sandbox.internal");
        assert_eq!(config.sandbox.post_completion_ttl(), Duration::from_secs(120));
        assert_eq!(config.sandbox.initial_ttl_secs, 1800);
        assert_eq!(config.agent.max_iterations, 8);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(matches!(
            DriveConfig::from_toml("[sandbox"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn overrides_replace_template_and_model() {
        let mut config = DriveConfig::default();
        config.apply_overrides(|key| match key {
            "CODE_AGENT_TEMPLATE" => Some("custom".to_string()),
            "CODE_AGENT_MODEL" => Some("grok-mini".to_string()),
            _ => None,
        });

        assert_eq!(config.sandbox.template_id, "custom");
        assert_eq!(config.agent.model, "grok-mini");
    }

    #[test]
    fn default_config_is_valid() {
        let result = DriveConfig::default().validate();
        assert!(result.is_valid(), "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn zero_iterations_is_an_error() {
        let mut config = DriveConfig::default();
        config.agent.max_iterations = 0;

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("max_iterations")));
    }

    #[test]
    fn short_initial_ttl_is_an_error_or_warning() {
        let mut config = SandboxConfig::default();
        config.initial_ttl_secs = 600;
        config.post_completion_ttl_secs = 600;
        assert!(!config.validate().is_valid());

        config.initial_ttl_secs = 200;
        config.post_completion_ttl_secs = 60;
        let result = config.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn relative_work_dir_is_rejected() {
        let config = SandboxConfig {
            work_dir: "home/user".to_string(),
            ..Default::default()
        };
        assert!(config
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("work_dir")));
    }

    #[test]
    fn host_with_scheme_is_rejected() {
        let config = SandboxConfig {
            host: "http://localhost".to_string(),
            ..Default::default()
        };
        assert!(config.validate().errors.iter().any(|e| e.contains("host")));
    }

    #[test]
    fn into_result_joins_errors() {
        let mut result = ValidationResult::default();
        result.add_error("a");
        result.add_error("b");
        match result.into_result() {
            Err(Error::Config(msg)) => assert_eq!(msg, "a; b"),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
