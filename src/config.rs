//! Configuration management for Pipewright.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External code-generation tool settings
    pub tool: ToolConfig,

    /// Process runner settings
    pub runner: RunnerConfig,

    /// Prompt construction settings
    pub prompt: PromptConfig,

    /// Persistence settings
    pub store: StoreConfig,
}

/// External CLI tool invocation settings.
///
/// The tool is always invoked non-interactively: the configured flags must
/// auto-approve any actions the tool would normally confirm, and the
/// instruction is passed verbatim as the single trailing argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name or path
    pub command: String,

    /// Flags placed before the instruction argument
    pub args: Vec<String>,

    /// Extra environment variables for the child process
    pub env: Vec<(String, String)>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()],
            env: vec![
                ("NO_COLOR".to_string(), "1".to_string()),
                ("TERM".to_string(), "dumb".to_string()),
                ("CI".to_string(), "true".to_string()),
            ],
        }
    }
}

/// Process runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock limit per subprocess execution, in seconds
    pub timeout_secs: u64,

    /// Wait after a graceful termination signal before force-killing, in seconds
    pub grace_secs: u64,

    /// How long terminal task entries stay readable in the registry, in seconds
    pub retention_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { timeout_secs: 600, grace_secs: 5, retention_secs: 30 }
    }
}

impl RunnerConfig {
    /// Default per-task timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Grace period between graceful and forced termination.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Post-completion registry retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Prompt construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Character budget for the previous stage's output excerpt.
    /// Excess is dropped from the tail; early context carries the most
    /// instruction-following weight.
    pub excerpt_budget: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { excerpt_budget: 4000 }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for workflow and task records. Defaults to the platform
    /// data directory when unset.
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the store directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pipewright")
                .join("store")
        })
    }
}

impl Config {
    /// Default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pipewright")
            .join("config.toml")
    }

    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
