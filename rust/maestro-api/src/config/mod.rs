//! Configuration management.
//!
//! Configuration loads from defaults, an optional `config/maestro` file,
//! and `MAESTRO__`-prefixed environment variables (with `.env` support),
//! in that order. Every recognized option has a documented default, so the
//! service starts with no configuration at all.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::llm::LlmSettings;
use crate::push::ConnectionManagerConfig;
use crate::workflow::classify::default_tool_keywords;
use crate::workflow::multiagent::StrategyThresholds;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server binding and timeouts.
    #[serde(default)]
    pub server: ServerConfig,
    /// Planner limits.
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Step classifier keyword set.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Multi-agent strategy thresholds.
    #[serde(default)]
    pub multi_agent: MultiAgentConfig,
    /// Progress delivery tuning.
    #[serde(default)]
    pub progress: ProgressConfig,
    /// Push transport liveness tuning.
    #[serde(default)]
    pub transport: TransportConfig,
    /// LLM connection and model settings.
    #[serde(default)]
    pub llm: LlmSettings,
    /// Tool invocation tuning.
    #[serde(default)]
    pub tool: ToolConfig,
    /// Context accumulation tuning.
    #[serde(default)]
    pub context: ContextConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from defaults, config files, and environment.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        Self::load_with_file(config::File::with_name("config/maestro").required(false))
    }

    /// Load configuration from an explicit config file plus the environment.
    pub fn load_from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        Self::load_with_file(config::File::from(path.to_path_buf()))
    }

    fn load_with_file<F>(file: F) -> anyhow::Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
    {
        let loader = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MAESTRO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = loader.try_deserialize().unwrap_or_default();

        // Provider API key: dedicated variables win over file config.
        if let Ok(key) = std::env::var("MAESTRO_LLM_API_KEY") {
            app_config.llm.api_key = Some(key);
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            app_config.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("MAESTRO_LLM_BASE_URL") {
            app_config.llm.base_url = url;
        }

        Ok(app_config)
    }

    /// Connection manager tuning derived from the progress and transport
    /// sections.
    #[must_use]
    pub fn connection_manager(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            outbox_capacity: self.progress.outbox_capacity,
            terminal_enqueue_timeout: Duration::from_millis(
                self.progress.terminal_enqueue_timeout_ms,
            ),
            heartbeat_interval: Duration::from_millis(self.transport.heartbeat_interval_ms),
            liveness_deadline: Duration::from_millis(self.transport.liveness_deadline_ms),
        }
    }

    /// Multi-agent strategy thresholds.
    #[must_use]
    pub fn strategy_thresholds(&self) -> StrategyThresholds {
        StrategyThresholds {
            single_max: self.multi_agent.single_max,
            parallel_min: self.multi_agent.parallel_min,
        }
    }

    /// Grace period before terminal broadcaster state is purged.
    #[must_use]
    pub fn progress_grace_period(&self) -> Duration {
        Duration::from_millis(self.progress.grace_period_ms)
    }

    /// Per-call deadline for LLM calls.
    #[must_use]
    pub fn llm_call_timeout(&self) -> Duration {
        self.llm.call_timeout()
    }

    /// Per-call deadline for tool invocations.
    #[must_use]
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_millis(self.tool.call_timeout_ms)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Planner limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Maximum steps per plan.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    20
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

/// Step classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Tool-verb set; a step mentioning any of these is a tool step.
    #[serde(default = "default_tool_keywords")]
    pub tool_keywords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tool_keywords: default_tool_keywords(),
        }
    }
}

/// Multi-agent strategy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentConfig {
    /// Complexity scores at or below this run single-agent.
    #[serde(default = "default_single_max")]
    pub single_max: f64,
    /// Complexity scores at or above this are eligible for parallel waves.
    #[serde(default = "default_parallel_min")]
    pub parallel_min: f64,
}

fn default_single_max() -> f64 {
    0.33
}

fn default_parallel_min() -> f64 {
    0.66
}

impl Default for MultiAgentConfig {
    fn default() -> Self {
        Self {
            single_max: default_single_max(),
            parallel_min: default_parallel_min(),
        }
    }
}

/// Progress delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Outbox depth per subscriber.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// How long a terminal frame may wait for outbox space.
    #[serde(default = "default_terminal_enqueue_timeout_ms")]
    pub terminal_enqueue_timeout_ms: u64,
    /// How long terminal broadcaster state lingers for late subscribers.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_terminal_enqueue_timeout_ms() -> u64 {
    2_000
}

fn default_grace_period_ms() -> u64 {
    60_000
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
            terminal_enqueue_timeout_ms: default_terminal_enqueue_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// Push transport liveness tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Heartbeat interval when a channel is otherwise silent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Disconnect subscribers silent longer than this.
    #[serde(default = "default_liveness_deadline_ms")]
    pub liveness_deadline_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_liveness_deadline_ms() -> u64 {
    30_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_deadline_ms: default_liveness_deadline_ms(),
        }
    }
}

/// Tool invocation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Per-call deadline for tool invocations in milliseconds.
    #[serde(default = "default_tool_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_tool_call_timeout_ms() -> u64 {
    120_000
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_tool_call_timeout_ms(),
        }
    }
}

/// Context accumulation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget for the rolling context string.
    #[serde(default = "default_char_budget")]
    pub char_budget: usize,
}

fn default_char_budget() -> usize {
    4_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            char_budget: default_char_budget(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to emit JSON-formatted logs.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.planner.max_steps, 20);
        assert_eq!(config.progress.outbox_capacity, 256);
        assert_eq!(config.progress.terminal_enqueue_timeout_ms, 2_000);
        assert_eq!(config.progress.grace_period_ms, 60_000);
        assert_eq!(config.transport.heartbeat_interval_ms, 15_000);
        assert_eq!(config.transport.liveness_deadline_ms, 30_000);
        assert_eq!(config.tool.call_timeout_ms, 120_000);
        assert_eq!(config.context.char_budget, 4_000);
        assert!((config.multi_agent.single_max - 0.33).abs() < f64::EPSILON);
        assert!((config.multi_agent.parallel_min - 0.66).abs() < f64::EPSILON);
    }

    #[test]
    fn connection_manager_config_derives_durations() {
        let config = AppConfig::default();
        let manager = config.connection_manager();
        assert_eq!(manager.outbox_capacity, 256);
        assert_eq!(manager.terminal_enqueue_timeout, Duration::from_secs(2));
        assert_eq!(manager.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(manager.liveness_deadline, Duration::from_secs(30));
    }

    #[test]
    fn classifier_defaults_carry_the_verb_set() {
        let config = AppConfig::default();
        assert!(config.classifier.tool_keywords.iter().any(|k| k == "search"));
        assert!(config.classifier.tool_keywords.len() >= 30);
    }

    #[test]
    fn load_reads_file_and_environment_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maestro.toml");
        std::fs::write(
            &path,
            "[planner]\n\
             max_steps = 7\n\n\
             [progress]\n\
             outbox_capacity = 32\n\n\
             [llm]\n\
             model = \"local-test\"\n",
        )
        .unwrap();

        std::env::set_var("MAESTRO__TRANSPORT__LIVENESS_DEADLINE_MS", "9000");
        std::env::set_var("MAESTRO_LLM_API_KEY", "sk-maestro-test");

        let config = AppConfig::load_from_path(&path).unwrap();

        std::env::remove_var("MAESTRO__TRANSPORT__LIVENESS_DEADLINE_MS");
        std::env::remove_var("MAESTRO_LLM_API_KEY");

        // file values land in their sections
        assert_eq!(config.planner.max_steps, 7);
        assert_eq!(config.progress.outbox_capacity, 32);
        assert_eq!(config.llm.model, "local-test");

        // environment overrides win over defaults
        assert_eq!(config.transport.liveness_deadline_ms, 9_000);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-maestro-test"));

        // untouched sections keep their defaults
        assert_eq!(config.tool.call_timeout_ms, 120_000);
        assert_eq!(config.context.char_budget, 4_000);
    }
}
