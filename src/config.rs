//! Configuration file support for reportgraph
//!
//! Reads from .reportgraph/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Document export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Content generation settings
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// When set, every `/api` request must carry `Authorization: Bearer <token>`
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExportConfig {
    /// Deepest heading level written to documents (1-6)
    /// Default: 3
    #[serde(default = "default_max_heading_level")]
    pub max_heading_level: u8,

    /// Attach parentless nodes to the closest preceding section in their column
    /// Default: false
    #[serde(default)]
    pub infer_parents: bool,

    /// Horizontal distance under which two canvas nodes share a column
    #[serde(default = "default_column_tolerance")]
    pub column_tolerance: f64,

    /// Format used when none is given on the command line
    #[serde(default = "default_format")]
    pub default_format: String,
}

fn default_max_heading_level() -> u8 {
    3
}

fn default_column_tolerance() -> f64 {
    crate::graph::COLUMN_TOLERANCE
}

fn default_format() -> String {
    "docx".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_heading_level: default_max_heading_level(),
            infer_parents: false,
            column_tolerance: default_column_tolerance(),
            default_format: default_format(),
        }
    }
}

impl ExportConfig {
    /// Configured level forced into the range documents support
    pub fn heading_level(&self) -> u8 {
        self.max_heading_level.clamp(1, 6)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AiConfig {
    /// OpenAI-compatible API root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1500
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl AiConfig {
    /// API key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    /// Load config from .reportgraph/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file")
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not read config file")
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".reportgraph").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }
}
