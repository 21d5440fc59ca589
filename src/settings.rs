use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PennyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Base URL of the account-aggregation feed.
    #[serde(default)]
    pub feed_url: String,
    #[serde(default)]
    pub feed_client_id: String,
    /// Merchant-mapping confidence needed to bypass review.
    #[serde(default = "default_auto_confirm_threshold")]
    pub auto_confirm_threshold: i64,
    /// Model used by the generative fallback tier.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Whether the generative fallback tier is consulted at all.
    #[serde(default = "default_true")]
    pub classifier_enabled: bool,
    /// Scheduler interval for the sync-all job, in minutes.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u64,
}

fn default_auto_confirm_threshold() -> i64 {
    crate::cascade::DEFAULT_AUTO_CONFIRM_THRESHOLD
}

fn default_classifier_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    240
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            feed_url: String::new(),
            feed_client_id: String::new(),
            auto_confirm_threshold: default_auto_confirm_threshold(),
            classifier_model: default_classifier_model(),
            classifier_enabled: true,
            sync_interval_minutes: default_sync_interval(),
        }
    }
}

impl Settings {
    /// Secrets never land in settings.json; they come from the environment.
    pub fn feed_secret(&self) -> Option<String> {
        std::env::var("PENNY_FEED_SECRET").ok().filter(|s| !s.is_empty())
    }

    pub fn classifier_api_key(&self) -> Option<String> {
        std::env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty())
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("penny")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("penny")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| PennyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn get_data_dir() -> PathBuf {
    PathBuf::from(&load_settings().data_dir)
}

pub fn db_path() -> PathBuf {
    get_data_dir().join("penny.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            feed_url: "https://feed.example.com".to_string(),
            ..Settings::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.feed_url, "https://feed.example.com");
        assert_eq!(loaded.auto_confirm_threshold, 3);
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.auto_confirm_threshold, 3);
        assert_eq!(s.sync_interval_minutes, 240);
        assert!(s.classifier_enabled);
        assert!(!s.data_dir.is_empty());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/x", "feed_url": "https://f"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.auto_confirm_threshold, 3);
        assert_eq!(s.classifier_model, "claude-3-5-haiku-latest");
    }
}
