use anyhow::Result;

use receipt_audit::models::{AggregateMetrics, AiContext, VendorMemory};
use receipt_audit::services::state::AppState;

pub fn totals(state: &AppState, project_id: &str, vendor_id: &str) -> Result<AggregateMetrics> {
    Ok(state
        .orchestrator
        .evidence()
        .get_computed_totals(project_id, vendor_id)?)
}

pub fn memory(state: &AppState, project_id: &str, vendor_id: &str) -> Result<VendorMemory> {
    Ok(state.orchestrator.get_vendor_memory(project_id, vendor_id)?)
}

pub fn context(state: &AppState, project_id: &str, vendor_id: &str) -> Result<AiContext> {
    Ok(state
        .orchestrator
        .evidence()
        .build_ai_context(project_id, vendor_id)?)
}
