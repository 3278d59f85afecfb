use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the endpoint from the config file
pub const ENDPOINT_ENV: &str = "PORTAL_CHAT_ENDPOINT";
/// Environment variable overriding the sender from the config file
pub const SENDER_ENV: &str = "PORTAL_CHAT_SENDER";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Full URL of the agent's chat endpoint
    pub endpoint: String,

    /// Sender identifier sent with every message (usually an e-mail)
    pub sender: String,

    /// Request timeout in seconds, 0 disables it
    pub timeout_secs: u64,

    /// UI preferences
    pub ui: UiConfig,

    /// Home directory for config and logs
    #[serde(skip)]
    pub home: PathBuf,
}

/// UI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Show HH:MM:SS next to each bubble
    pub show_timestamps: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_timestamps: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Config {
            endpoint: "http://127.0.0.1:8000/chat".to_string(),
            sender: String::new(),
            timeout_secs: 60,
            ui: UiConfig::default(),
            home: home.join(".portal-chat"),
        }
    }
}

impl Config {
    /// Load `~/.portal-chat/config.toml`, then apply environment overrides
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Self::load_from(&home.join(".portal-chat"))
    }

    /// Load from an explicit home directory, then apply environment overrides
    pub fn load_from(home: &Path) -> Result<Self> {
        let mut config = Self::read_file(home)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read `<home>/config.toml` without looking at the environment
    pub fn read_file(home: &Path) -> Result<Self> {
        let config_path = home.join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.home = home.to_path_buf();
        Ok(config)
    }

    /// Save configuration to `<home>/config.toml`
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.home)
            .with_context(|| format!("Failed to create {}", self.home.display()))?;
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(self.config_path(), content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Request timeout, `None` when disabled
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }

    /// Apply overrides from a variable lookup (the process env in practice)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(sender) = lookup(SENDER_ENV) {
            self.sender = sender;
        }
    }
}
