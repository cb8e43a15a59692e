use anyhow::Result;

use receipt_audit::models::ConversationEntry;
use receipt_audit::services::orchestrator::{ChatReply, ChatRequest};
use receipt_audit::services::state::AppState;

pub async fn chat(
    state: &AppState,
    project_id: &str,
    vendor_id: &str,
    message: Option<String>,
    tool_name: Option<String>,
    receipt_id: Option<String>,
) -> Result<ChatReply> {
    let request = ChatRequest {
        message: message.unwrap_or_default(),
        tool_name,
        receipt_id,
    };
    Ok(state.orchestrator.chat(project_id, vendor_id, request).await?)
}

pub fn history(state: &AppState, project_id: &str, vendor_id: &str) -> Result<Vec<ConversationEntry>> {
    Ok(state
        .orchestrator
        .conversations()
        .get_chat_history(project_id, vendor_id)?)
}
