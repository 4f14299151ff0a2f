use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ai::{DEFAULT_MODEL, DEFAULT_PROMPT, OPENAI_API_URL};
use crate::error::{AppError, Result};
use crate::services::TELEGRAM_API_URL;

const APP_DIR: &str = "newswire";
const ENV_PREFIX: &str = "NEWSWIRE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_channel_id: i64,
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,

    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_minutes: u64,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_minutes: u64,
    /// Falls back to the fetch interval when unset.
    #[serde(default)]
    pub lookback_window_minutes: Option<u64>,

    #[serde(default)]
    pub filter_keywords: Vec<String>,

    pub openai_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_prompt")]
    pub openai_prompt: String,
    #[serde(default = "default_openai_api_url")]
    pub openai_api_url: String,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("newswire.db")
        .to_string_lossy()
        .to_string()
}

fn default_telegram_api_url() -> String {
    TELEGRAM_API_URL.to_string()
}

fn default_fetch_interval() -> u64 {
    10
}

fn default_publish_interval() -> u64 {
    1
}

fn default_openai_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_openai_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_openai_api_url() -> String {
    OPENAI_API_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            telegram_bot_token: String::new(),
            telegram_channel_id: 0,
            telegram_api_url: default_telegram_api_url(),
            fetch_interval_minutes: default_fetch_interval(),
            publish_interval_minutes: default_publish_interval(),
            lookback_window_minutes: None,
            filter_keywords: Vec::new(),
            openai_key: None,
            openai_model: default_openai_model(),
            openai_prompt: default_openai_prompt(),
            openai_api_url: default_openai_api_url(),
        }
    }
}

impl Config {
    /// Load the config file, apply environment overrides and validate.
    ///
    /// A missing file is created with defaults, which fail validation until
    /// a bot token and channel are filled in.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            config
        };

        config.apply_env(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())?;
        config.validate().map_err(|e| match e {
            AppError::Config(msg) => {
                AppError::Config(format!("{}: {}", config_path.display(), msg))
            }
            other => other,
        })?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Secrets may come from the environment instead of the file.
    fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = token;
        }
        if let Some(channel_id) = var("TELEGRAM_CHANNEL_ID") {
            self.telegram_channel_id = channel_id.trim().parse().map_err(|_| {
                AppError::Config(format!("invalid {ENV_PREFIX}TELEGRAM_CHANNEL_ID: {channel_id}"))
            })?;
        }
        if let Some(key) = var("OPENAI_KEY") {
            self.openai_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(AppError::Config(format!(
                "telegram_bot_token is not set (edit the file or set {ENV_PREFIX}TELEGRAM_BOT_TOKEN)"
            )));
        }
        if self.telegram_channel_id == 0 {
            return Err(AppError::Config("telegram_channel_id is not set".to_string()));
        }
        if self.fetch_interval_minutes == 0 || self.publish_interval_minutes == 0 {
            return Err(AppError::Config("intervals must be at least one minute".to_string()));
        }
        if self.lookback_window_minutes == Some(0) {
            return Err(AppError::Config("lookback_window_minutes must not be zero".to_string()));
        }
        for (name, value) in [
            ("telegram_api_url", &self.telegram_api_url),
            ("openai_api_url", &self.openai_api_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| AppError::Config(format!("{name} is not a valid URL: {e}")))?;
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        minutes(self.fetch_interval_minutes)
    }

    pub fn publish_interval(&self) -> Duration {
        minutes(self.publish_interval_minutes)
    }

    pub fn lookback_window(&self) -> Duration {
        minutes(self.lookback_window_minutes.unwrap_or(self.fetch_interval_minutes))
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}
