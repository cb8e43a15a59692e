use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::utils::now_rfc3339;

const PLACEHOLDER_JOB_ID: &str = "mock-job-id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub id: String,
    pub name: String,
    pub accepted_at: String,
}

/// Accepts background analysis jobs without running them. Callers get a
/// placeholder ticket and must not wait on any result.
#[derive(Debug, Clone, Copy, Default)]
pub struct FraudQueue;

impl FraudQueue {
    pub fn enqueue(&self, name: &str, payload: &Value) -> JobTicket {
        info!(job = name, payload = %payload, "analysis job accepted (not executed)");
        JobTicket {
            id: PLACEHOLDER_JOB_ID.to_string(),
            name: name.to_string(),
            accepted_at: now_rfc3339(),
        }
    }
}
