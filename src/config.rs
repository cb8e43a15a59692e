use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AuditError, Result};

pub const DEFAULT_PROJECT_ID: &str = "project_001";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
pub const DEFAULT_HIGH_VALUE_THRESHOLD: f64 = 5_000_000.0;
pub const DEFAULT_CHAT_RETENTION: usize = 100;
pub const MIN_CHAT_RETENTION: usize = 50;

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub vision_model: String,
    pub chat_model: String,
    pub provider_timeout_secs: u64,
    pub chat_retention: usize,
    pub high_value_threshold: f64,
    pub visual_forensics: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("./data"),
            openrouter_api_key: None,
            openrouter_base_url: DEFAULT_BASE_URL.to_string(),
            vision_model: DEFAULT_MODEL.to_string(),
            chat_model: DEFAULT_MODEL.to_string(),
            provider_timeout_secs: 30,
            chat_retention: DEFAULT_CHAT_RETENTION,
            high_value_threshold: DEFAULT_HIGH_VALUE_THRESHOLD,
            visual_forensics: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let chat_retention: usize = parse_or(get("AUDIT_CHAT_RETENTION"), "AUDIT_CHAT_RETENTION", defaults.chat_retention)?;

        Ok(Settings {
            data_dir: get("AUDIT_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_base_url: get("OPENROUTER_BASE_URL").unwrap_or(defaults.openrouter_base_url),
            vision_model: get("AUDIT_VISION_MODEL").unwrap_or(defaults.vision_model),
            chat_model: get("AUDIT_CHAT_MODEL").unwrap_or(defaults.chat_model),
            provider_timeout_secs: parse_or(
                get("AUDIT_PROVIDER_TIMEOUT_SECS"),
                "AUDIT_PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout_secs,
            )?,
            chat_retention: chat_retention.clamp(MIN_CHAT_RETENTION, DEFAULT_CHAT_RETENTION),
            high_value_threshold: parse_or(
                get("AUDIT_HIGH_VALUE_THRESHOLD"),
                "AUDIT_HIGH_VALUE_THRESHOLD",
                defaults.high_value_threshold,
            )?,
            visual_forensics: parse_or(get("AUDIT_VISUAL_FORENSICS"), "AUDIT_VISUAL_FORENSICS", defaults.visual_forensics)?,
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn evidence_db_path(&self) -> PathBuf {
        self.data_dir.join("evidence.sqlite")
    }

    pub fn chat_db_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| AuditError::Config(format!("{} has invalid value {:?}", key, value))),
    }
}
