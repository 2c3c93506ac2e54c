//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level beeswarm configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assistants: Vec<AssistantConfig>,
}

/// Chat-completion / assistants API endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: `api_key`, then `api_key_env`, then `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| resolve_secret_field(&None, &Some(DEFAULT_API_KEY_ENV.to_string())))
    }
}

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on turns per run; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute_tools: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,

    /// Delay between run status checks in the thread engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// Handoffs allowed within a single thread-engine task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_handoffs: Option<usize>,

    /// Where conversation transcripts are written (default: `~/.beeswarm/logs`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "beeswarm_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// An agent for the chat-completion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    /// Falls back to `provider.default_model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// May contain `{key}` placeholders filled from context variables.
    #[serde(default)]
    pub instructions: String,

    /// Names of agents this one may transfer to.
    #[serde(default)]
    pub handoffs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

/// A provider-hosted assistant for the thread engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub name: String,
    pub assistant_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default)]
    pub handoffs: Vec<String>,

    /// Save this assistant's conversation after each task.
    #[serde(default)]
    pub log: bool,
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::SwarmError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse JSON5 text, substituting `${ENV_VAR}` references first.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        json5::from_str(&substituted).map_err(|e| crate::error::SwarmError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn default_model(&self) -> String {
        self.provider
            .as_ref()
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| "gpt-4o".to_string())
    }

    pub fn api_key(&self) -> Option<String> {
        match &self.provider {
            Some(p) => p.resolve_api_key(),
            None => ProviderConfig::default().resolve_api_key(),
        }
    }

    pub fn base_url(&self) -> Option<String> {
        self.provider.as_ref().and_then(|p| p.base_url.clone())
    }

    pub fn max_turns(&self) -> Option<usize> {
        self.engine.as_ref().and_then(|e| e.max_turns)
    }

    pub fn execute_tools(&self) -> bool {
        self.engine
            .as_ref()
            .and_then(|e| e.execute_tools)
            .unwrap_or(true)
    }

    pub fn stream(&self) -> bool {
        self.engine.as_ref().and_then(|e| e.stream).unwrap_or(false)
    }

    pub fn debug(&self) -> bool {
        self.engine.as_ref().and_then(|e| e.debug).unwrap_or(false)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.engine
            .as_ref()
            .and_then(|e| e.poll_interval_ms)
            .unwrap_or(1000)
    }

    pub fn max_handoffs(&self) -> usize {
        self.engine
            .as_ref()
            .and_then(|e| e.max_handoffs)
            .unwrap_or(8)
    }

    /// Transcript directory, `~` expanded.
    pub fn transcript_dir(&self) -> PathBuf {
        self.engine
            .as_ref()
            .and_then(|e| e.transcript_dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("logs"))
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn assistant(&self, name: &str) -> Option<&AssistantConfig> {
        self.assistants.iter().find(|a| a.name == name)
    }

    /// Get a config value by dotted path (e.g. "engine.max_turns").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = match current {
                serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                other => other.get(segment)?,
            };
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.api_key().is_none() {
            warnings.push("No API key configured (set provider.api_key or OPENAI_API_KEY)".into());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                errors.push("Agent with empty name".to_string());
                continue;
            }
            if !seen.insert(agent.name.as_str()) {
                errors.push(format!("Duplicate agent name: {}", agent.name));
            }
            if agent.instructions.trim().is_empty() {
                warnings.push(format!("Agent '{}' has no instructions", agent.name));
            }
        }
        for agent in &self.agents {
            for target in &agent.handoffs {
                if self.agent(target).is_none() {
                    errors.push(format!(
                        "Agent '{}' hands off to unknown agent '{target}'",
                        agent.name
                    ));
                }
            }
        }

        for assistant in &self.assistants {
            if assistant.assistant_id.trim().is_empty() {
                errors.push(format!("Assistant '{}' has no assistant_id", assistant.name));
            }
            for target in &assistant.handoffs {
                if self.assistant(target).is_none() {
                    errors.push(format!(
                        "Assistant '{}' hands off to unknown assistant '{target}'",
                        assistant.name
                    ));
                }
            }
        }

        if let Some(engine) = &self.engine {
            if engine.poll_interval_ms == Some(0) {
                errors.push("engine.poll_interval_ms cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for beeswarm data: `~/.beeswarm/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".beeswarm")
}
