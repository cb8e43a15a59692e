use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::error::Result;

/// Text-completion backend used by the chat path.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the raw reply text. A missing credential is `AuditError::MissingApiKey`.
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

fn json_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static JSON block pattern"))
}

/// Outermost `{...}` span of a model reply, parsed. `None` when absent or not valid JSON.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let block = json_block_pattern().find(text)?;
    serde_json::from_str::<Value>(block.as_str()).ok()
}

/// Best-effort structured reply: the embedded JSON object, or the whole text as a summary.
pub fn parse_reply(text: &str) -> Value {
    match extract_json_block(text) {
        Some(value) => value,
        None => json!({ "analysisSummary": text }),
    }
}
