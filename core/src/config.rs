use crate::errors::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the application directory under the user config dir
pub const APP_NAME: &str = "roster-query";

/// Top-level configuration for the roster query daemon
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RosterConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub completion: CompletionConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
}

/// HTTP shell settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Database capability settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Number of sample rows included in schema descriptors
    pub sample_rows: usize,
    /// Create and verify the employees table at startup
    pub initialize: bool,
    pub busy_timeout_ms: u64,
    /// A statement still running after this long is interrupted
    pub query_timeout_ms: u64,
    /// Maximum rows fetched into a single query observation
    pub max_result_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("employee_database.db"),
            sample_rows: 2,
            initialize: true,
            busy_timeout_ms: 5000,
            query_timeout_ms: 30_000,
            max_result_rows: 200,
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Completion engine settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// The provider ("ollama" or "openai")
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// API key, only needed for hosted OpenAI-compatible endpoints
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub startup_probe_attempts: u32,
    pub startup_probe_interval_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3:12b".to_string(),
            temperature: 0.5,
            api_key: None,
            request_timeout_secs: 120,
            startup_probe_attempts: 3,
            startup_probe_interval_secs: 5,
        }
    }
}

impl CompletionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn startup_probe_interval(&self) -> Duration {
        Duration::from_secs(self.startup_probe_interval_secs)
    }
}

/// Reasoning loop limits
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of completion cycles per run
    pub max_iterations: usize,
    /// Consecutive malformed responses tolerated before the run aborts
    pub max_parse_failures: usize,
    pub completion_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Number of most recent turns rendered into the prompt
    pub history_window: usize,
    pub max_observation_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_parse_failures: 3,
            completion_timeout_secs: 120,
            tool_timeout_secs: 30,
            history_window: 20,
            max_observation_chars: 4000,
        }
    }
}

impl AgentConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Conversation memory bounds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_conversations: usize,
    /// Idle time after which a conversation expires; 0 disables expiry
    pub idle_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_conversations: 1024,
            idle_ttl_secs: 86_400,
        }
    }
}

impl MemoryConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        if self.idle_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_ttl_secs))
        }
    }
}

impl RosterConfig {
    /// Loads configuration from a file if it exists, otherwise returns the default config
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                CoreError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                CoreError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;

            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from the default location
    pub fn load_from_default() -> CoreResult<Self> {
        let path = get_default_config_file(APP_NAME)?;
        Self::load_from_file(&path)
    }

    /// Saves configuration to a file
    pub fn save_to_file(&self, path: &Path) -> CoreResult<()> {
        let content = toml::to_string(self).map_err(|e| {
            CoreError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        // Ensure the directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

/// Helper function to get default config directory
pub fn get_default_config_dir(app_name: &str) -> CoreResult<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        CoreError::ConfigError("Could not determine home directory".to_string())
    })?;

    Ok(home_dir.join(".config").join(app_name))
}

/// Helper function to get default config file path
pub fn get_default_config_file(app_name: &str) -> CoreResult<PathBuf> {
    let config_dir = get_default_config_dir(app_name)?;
    Ok(config_dir.join("config.toml"))
}
