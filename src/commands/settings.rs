use anyhow::Result;
use serde::Serialize;

use receipt_audit::services::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub data_dir: String,
    pub openrouter_base_url: String,
    pub vision_model: String,
    pub chat_model: String,
    pub provider_timeout_secs: u64,
    pub chat_retention: usize,
    pub high_value_threshold: f64,
    pub visual_forensics: bool,
    pub api_key_from_env: bool,
}

pub fn set_api_key(state: &AppState, api_key: &str) -> Result<()> {
    state.save_api_key(api_key)?;
    Ok(())
}

/// Effective configuration without the key itself.
pub fn show(state: &AppState) -> SettingsView {
    let s = &state.settings;
    SettingsView {
        data_dir: s.data_dir.display().to_string(),
        openrouter_base_url: s.openrouter_base_url.clone(),
        vision_model: s.vision_model.clone(),
        chat_model: s.chat_model.clone(),
        provider_timeout_secs: s.provider_timeout_secs,
        chat_retention: s.chat_retention,
        high_value_threshold: s.high_value_threshold,
        visual_forensics: s.visual_forensics,
        api_key_from_env: s.openrouter_api_key.is_some(),
    }
}
