use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `config.yaml`.
///
/// Every field has a default so an empty (or absent) file yields a usable
/// configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Model backend settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Conversation-loop settings.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Model backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Base URL of the messages endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name to request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Completion token budget per request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between due-task polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// IANA timezone name for cron evaluation (e.g. "America/New_York").
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Conversation-loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Maximum model→tool→model iterations per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Wall-clock budget in seconds for custom-tool and script subprocesses.
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,
    /// Base system prompt. The core-memory projection is appended to it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_script_timeout_secs() -> u64 {
    60
}

fn default_system_prompt() -> String {
    "You are a capable assistant with a persistent memory, a scheduler, and \
     the ability to write new tools for yourself. Use the tools you have; \
     when none fits, create one."
        .to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval_secs: default_poll_interval_secs(),
            timezone: default_timezone(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_iterations: default_max_iterations(),
            script_timeout_secs: default_script_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Config {
    /// Read and parse a YAML configuration file. A missing file yields the
    /// defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        let config: Config =
            serde_yaml_ng::from_str(&contents).context("failed to parse config YAML")?;
        config.validate()?;

        tracing::debug!(
            model = %config.model.model,
            poll_interval_secs = config.scheduler.poll_interval_secs,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.poll_interval_secs == 0 {
            anyhow::bail!("config: scheduler.poll_interval_secs=0 (would create busy loop)");
        }
        if self.scheduler.timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!(
                "config: unknown timezone '{}' (expected an IANA name)",
                self.scheduler.timezone
            );
        }
        if self.agent.max_iterations == 0 {
            anyhow::bail!("config: agent.max_iterations must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::load(&tmp.path().join("config.yaml")).await.unwrap();
        assert_eq!(cfg.scheduler.poll_interval_secs, 30);
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.scheduler.timezone, "UTC");
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "scheduler:\n  poll_interval_secs: 5\n").unwrap();
        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.scheduler.poll_interval_secs, 5);
        assert_eq!(cfg.model.max_tokens, 4096);
    }

    #[tokio::test]
    async fn bad_timezone_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "scheduler:\n  timezone: Mars/Olympus\n").unwrap();
        assert!(Config::load(&path).await.is_err());
    }
}
