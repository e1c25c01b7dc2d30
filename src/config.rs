use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Title used when neither `--title` nor the config file sets one
pub const DEFAULT_TITLE: &str = "Terminal";

/// Application configuration loaded from file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeckonConfig {
    /// Defaults applied to every delivered notification
    #[serde(default)]
    pub defaults: DeliveryDefaults,
}

/// Per-notification defaults, overridden by command-line options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryDefaults {
    /// Title when `--title` is absent
    #[serde(default = "default_title")]
    pub title: String,

    /// Sound name when `--sound` is absent ("default" for the platform sound)
    #[serde(default)]
    pub sound: Option<String>,

    /// Bundle identifier shown as the sender when `--sender` is absent
    #[serde(default)]
    pub sender: Option<String>,

    /// Print activation results as JSON even without `--json`
    #[serde(default)]
    pub json: bool,
}

impl Default for DeliveryDefaults {
    fn default() -> Self {
        Self {
            title: default_title(),
            sound: None,
            sender: None,
            json: false,
        }
    }
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl BeckonConfig {
    /// Get the default configuration path
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from("~/.config/beckon/config.toml"),
            |dirs| dirs.config_dir().join("beckon").join("config.toml"),
        )
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file: {}, using defaults", e);
                Self::default()
            }
        }
    }
}
