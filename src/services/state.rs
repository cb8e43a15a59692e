use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{AuditError, Result};
use crate::services::conversation::ConversationStore;
use crate::services::crypto::CryptoService;
use crate::services::evidence::EvidenceStore;
use crate::services::openrouter::OpenRouterClient;
use crate::services::orchestrator::Orchestrator;
use crate::services::queue::FraudQueue;
use crate::services::scoring::ScoringConfig;

pub const API_KEY_SETTING: &str = "openrouter_api_key";

/// Everything a command needs, wired from one `Settings`.
pub struct AppState {
    pub settings: Settings,
    pub orchestrator: Orchestrator,
    pub queue: FraudQueue,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let evidence = EvidenceStore::open(&settings.evidence_db_path())?;
        let conversations =
            ConversationStore::open(&settings.chat_db_path(), settings.chat_retention)?;

        let api_key = resolve_api_key(&settings, &evidence)?;
        let client = Arc::new(OpenRouterClient::from_settings(&settings)?.with_api_key(api_key));
        if !client.has_api_key() {
            warn!("no OpenRouter API key configured; extraction and chat will degrade");
        }

        let orchestrator = Orchestrator::new(evidence, conversations)
            .with_vision(client.clone())
            .with_completion(client)
            .with_scoring(ScoringConfig {
                high_value_threshold: settings.high_value_threshold,
            })
            .with_provider_timeout(settings.provider_timeout())
            .with_visual_forensics(settings.visual_forensics);

        info!(data_dir = %settings.data_dir.display(), "audit state ready");
        Ok(AppState {
            settings,
            orchestrator,
            queue: FraudQueue,
        })
    }

    pub fn save_api_key(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AuditError::InvalidInput("API key is empty".to_string()));
        }
        let encrypted = CryptoService::encrypt_api_key(api_key)?;
        self.orchestrator.evidence().set_setting(API_KEY_SETTING, &encrypted)?;
        info!("OpenRouter API key stored");
        Ok(())
    }
}

/// Environment first, then the encrypted key in the settings table. A
/// plaintext or unreadable stored key is treated as absent.
fn resolve_api_key(settings: &Settings, evidence: &EvidenceStore) -> Result<Option<String>> {
    if let Some(key) = settings.openrouter_api_key.clone() {
        return Ok(Some(key));
    }
    let Some(stored) = evidence.get_setting(API_KEY_SETTING)? else {
        return Ok(None);
    };
    if !CryptoService::is_encrypted(&stored) {
        warn!("stored API key is not encrypted, ignoring it");
        return Ok(None);
    }
    match CryptoService::decrypt_api_key(&stored) {
        Ok(key) => Ok(Some(key)),
        Err(err) => {
            warn!(error = %err, "stored API key could not be decrypted");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn stored_key_is_encrypted_and_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(settings(dir.path())).unwrap();
        state.save_api_key(" sk-or-test ").unwrap();

        let stored = state
            .orchestrator
            .evidence()
            .get_setting(API_KEY_SETTING)
            .unwrap()
            .unwrap();
        assert!(stored.starts_with("enc:"));

        let resolved = resolve_api_key(&state.settings, state.orchestrator.evidence()).unwrap();
        assert_eq!(resolved.as_deref(), Some("sk-or-test"));
    }

    #[test]
    fn environment_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.openrouter_api_key = Some("from-env".to_string());
        let evidence = EvidenceStore::open(&s.evidence_db_path()).unwrap();
        evidence.set_setting(API_KEY_SETTING, "enc:garbage:x:y").unwrap();
        assert_eq!(resolve_api_key(&s, &evidence).unwrap().as_deref(), Some("from-env"));

        s.openrouter_api_key = None;
        assert_eq!(resolve_api_key(&s, &evidence).unwrap(), None);
    }

    #[test]
    fn plaintext_stored_key_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let evidence = EvidenceStore::open(&s.evidence_db_path()).unwrap();
        evidence.set_setting(API_KEY_SETTING, "sk-or-plaintext").unwrap();
        assert_eq!(resolve_api_key(&s, &evidence).unwrap(), None);
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(settings(dir.path())).unwrap();
        assert!(matches!(state.save_api_key("  "), Err(AuditError::InvalidInput(_))));
    }
}
