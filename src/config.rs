//! Configuration management with YAML support

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::locale::Locale;
use crate::provider::{validate_api_key, OpenAiCompletionService};
use crate::session::SessionSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub settings: UserSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Completion provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_enabled")]
    pub stream: bool,
}

/// User preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub locale: Locale,

    #[serde(default)]
    pub theme: Theme,

    #[serde(default)]
    pub font_size: FontSize,

    #[serde(default)]
    pub tree_view_mode: TreeViewMode,

    #[serde(default)]
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// How the conversation tree is drawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TreeViewMode {
    #[default]
    Auto,
    Simple,
    Advanced,
}

/// Logging configuration; `RUST_LOG` wins when set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/forkchat/forkchat.db".to_string()
}

fn default_base_url() -> String {
    crate::provider::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    crate::provider::DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Find the configuration file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./forkchat.yaml (current directory)
    /// 3. ~/.config/forkchat/forkchat.yaml
    pub fn locate(path: &str) -> Option<PathBuf> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "forkchat.yaml".to_string(),
            shellexpand::tilde("~/.config/forkchat/forkchat.yaml").to_string(),
        ];

        search_paths
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    /// Load configuration from the first file found by [`Config::locate`]
    pub fn load(path: &str) -> Result<Self> {
        match Self::locate(path) {
            Some(found) => Self::load_file(&found),
            // No config file found, use defaults
            None => Ok(Config::default()),
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration back as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Settings handed to each conversation session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            locale: self.settings.locale,
            model: self.completion.model.clone(),
            stream: self.completion.stream,
        }
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        let var = &self.completion.api_key_env;
        let key = std::env::var(var).with_context(|| format!("{} is not set", var))?;
        if !validate_api_key(&key) {
            bail!("{} does not look like an API key (expected 'sk-' prefix)", var);
        }
        Ok(key)
    }

    pub fn completion_service(&self) -> Result<OpenAiCompletionService> {
        Ok(OpenAiCompletionService::new(self.api_key()?)
            .with_base_url(&self.completion.base_url)
            .with_max_tokens(self.completion.max_tokens)
            .with_temperature(self.completion.temperature))
    }
}
