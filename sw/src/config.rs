//! stepweave configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::ExecutionMode;
use crate::placeholder::ArrayPolicy;
use crate::recovery::RecoveryAction;

/// Main stepweave configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduling, timeouts and resolution policy
    pub engine: EngineConfig,

    /// Failure recovery behavior
    pub recovery: RecoveryConfig,

    /// Final answer synthesis
    pub synthesis: SynthesisConfig,

    /// Prompt template overrides
    pub prompts: PromptsConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.engine.tool_timeout_ms == 0 {
            return Err(eyre!("engine.tool-timeout-ms must be greater than zero"));
        }
        if self.engine.max_concurrent_steps == 0 {
            return Err(eyre!("engine.max-concurrent-steps must be greater than zero"));
        }
        if self.engine.max_plan_attempts == 0 {
            return Err(eyre!("engine.max-plan-attempts must be greater than zero"));
        }
        check_markers("engine.content", &self.engine.content_open_tag, &self.engine.content_close_tag)?;
        check_markers("synthesis", &self.synthesis.open_marker, &self.synthesis.close_marker)?;
        if self.recovery.decision_timeout_secs == Some(0) {
            return Err(eyre!("recovery.decision-timeout-secs must be greater than zero when set"));
        }
        // a timed-out decision must never re-run the step unattended
        if self.recovery.timeout_action != RecoveryAction::Skip {
            return Err(eyre!("recovery.timeout-action must be skip"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .stepweave.yml
        let local_config = PathBuf::from(".stepweave.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/stepweave/stepweave.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stepweave").join("stepweave.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn check_markers(section: &str, open: &str, close: &str) -> Result<()> {
    if open.is_empty() || close.is_empty() {
        return Err(eyre!("{} markers must not be empty", section));
    }
    if open == close {
        return Err(eyre!("{} open and close markers must differ", section));
    }
    Ok(())
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sequential or DAG scheduling
    pub mode: ExecutionMode,

    /// Completion timeout for one tool call
    #[serde(rename = "tool-timeout-ms")]
    pub tool_timeout_ms: u64,

    /// Upper bound on concurrently running steps in DAG mode
    #[serde(rename = "max-concurrent-steps")]
    pub max_concurrent_steps: usize,

    /// What to do when an array reaches a scalar parameter
    #[serde(rename = "array-policy")]
    pub array_policy: ArrayPolicy,

    /// Plan requests before giving up on validation failures
    #[serde(rename = "max-plan-attempts")]
    pub max_plan_attempts: u32,

    /// Tag wrapping generated content
    #[serde(rename = "content-open-tag")]
    pub content_open_tag: String,

    #[serde(rename = "content-close-tag")]
    pub content_close_tag: String,

    /// Token limit for content generation sub-steps
    #[serde(rename = "generation-max-tokens")]
    pub generation_max_tokens: u32,

    /// Prior output size shown to content generation, in characters
    #[serde(rename = "max-context-chars")]
    pub max_context_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            tool_timeout_ms: 60_000,
            max_concurrent_steps: 8,
            array_policy: ArrayPolicy::First,
            max_plan_attempts: 3,
            content_open_tag: "<content>".to_string(),
            content_close_tag: "</content>".to_string(),
            generation_max_tokens: 4096,
            max_context_chars: 4000,
        }
    }
}

impl EngineConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Failure recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Carry the most recent successful output as a skipped step's fallback
    #[serde(rename = "skip-fallback")]
    pub skip_fallback: bool,

    /// Give up waiting for a decision after this many seconds (unset waits forever)
    #[serde(rename = "decision-timeout-secs")]
    pub decision_timeout_secs: Option<u64>,

    /// Action applied when the decision timeout elapses; only `skip` is accepted
    #[serde(rename = "timeout-action")]
    pub timeout_action: RecoveryAction,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            skip_fallback: true,
            decision_timeout_secs: None,
            timeout_action: RecoveryAction::Skip,
        }
    }
}

impl RecoveryConfig {
    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout_secs.map(Duration::from_secs)
    }
}

/// Final answer synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    #[serde(rename = "open-marker")]
    pub open_marker: String,

    #[serde(rename = "close-marker")]
    pub close_marker: String,

    /// Per-result output size in the prompt, in characters
    #[serde(rename = "max-result-chars")]
    pub max_result_chars: usize,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            open_marker: "<final_answer>".to_string(),
            close_marker: "</final_answer>".to_string(),
            max_result_chars: 4000,
            max_tokens: 4096,
        }
    }
}

/// Prompt template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory of `{name}.pmt` overrides
    pub dir: Option<PathBuf>,
}
