use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{NarcissusError, Result};

/// Top-level Narcissus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.1 }

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Tavily search depth: "basic" or "advanced".
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key: None,
            base_url: None,
            search_depth: default_search_depth(),
            max_results: default_max_results(),
        }
    }
}

fn default_search_provider() -> String { "tavily".to_string() }
fn default_search_depth() -> String { "advanced".to_string() }
fn default_max_results() -> u32 { 5 }

/// Which planned queries a research batch fans out to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPolicy {
    /// Skip queries that already have results in the accumulated research.
    #[default]
    NovelOnly,
    /// Search every planned query, replacing earlier results for it.
    Always,
}

/// Workflow run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Wall-clock budget for one run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Log every dispatched event at info level.
    #[serde(default)]
    pub verbose: bool,
    /// Concurrent search workers.
    #[serde(default = "default_search_workers")]
    pub search_workers: usize,
    #[serde(default)]
    pub research_policy: ResearchPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            verbose: false,
            search_workers: default_search_workers(),
            research_policy: ResearchPolicy::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 { 300 }
fn default_search_workers() -> usize { 4 }

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NarcissusError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| NarcissusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workflow.search_workers == 0 {
            return Err(NarcissusError::Config(
                "workflow.search_workers must be at least 1".into(),
            ));
        }
        if self.workflow.timeout_secs == 0 {
            return Err(NarcissusError::Config(
                "workflow.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Copy of this config with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.model.api_key.is_some() {
            config.model.api_key = Some("***".into());
        }
        if config.search.api_key.is_some() {
            config.search.api_key = Some("***".into());
        }
        config
    }
}

fn env_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("valid env reference regex"))
}

/// Replace `${VAR}` with the variable's value. Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    env_reference()
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
