use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use receipt_audit::models::{Decision, Receipt, VendorContext};
use receipt_audit::services::orchestrator::{
    ManualEvidence, ManualEvidenceOutcome, ProcessOutcome, ReceiptUpload,
};
use receipt_audit::services::queue::JobTicket;
use receipt_audit::services::state::AppState;
use receipt_audit::services::vision::{is_supported_image, mime_type_for};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProcessOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn audit(
    state: &AppState,
    project_id: &str,
    vendor_id: &str,
    image: &Path,
    fraud_flags: u32,
) -> Result<ProcessOutcome> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Read receipt image {}", image.display()))?;
    let upload = ReceiptUpload {
        image_path: image.to_string_lossy().to_string(),
        image: bytes,
        mime_type: mime_type_for(image).to_string(),
        vendor: VendorContext { fraud_flags },
    };
    let outcome = state
        .orchestrator
        .process_receipt(project_id, vendor_id, upload)
        .await?;
    Ok(outcome)
}

/// Audits every supported image directly inside `folder`, in file-name order.
/// A failure on one image is reported in its entry and does not stop the scan.
pub async fn scan(
    state: &AppState,
    project_id: &str,
    vendor_id: &str,
    folder: &Path,
    fraud_flags: u32,
) -> Result<Vec<ScanEntry>> {
    let mut images = walkdir::WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| is_supported_image(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<PathBuf>>();
    images.sort();
    info!(folder = %folder.display(), count = images.len(), "scanning receipt folder");

    let mut entries = Vec::with_capacity(images.len());
    for path in images {
        let image_path = path.to_string_lossy().to_string();
        match audit(state, project_id, vendor_id, &path, fraud_flags).await {
            Ok(outcome) => entries.push(ScanEntry {
                image_path,
                outcome: Some(outcome),
                error: None,
            }),
            Err(err) => {
                warn!(image = %image_path, error = %err, "receipt audit failed");
                entries.push(ScanEntry {
                    image_path,
                    outcome: None,
                    error: Some(format!("{:#}", err)),
                });
            }
        }
    }
    Ok(entries)
}

pub fn override_decision(
    state: &AppState,
    project_id: &str,
    vendor_id: &str,
    receipt_id: &str,
    decision: &str,
) -> Result<Receipt> {
    let decision: Decision = decision.parse()?;
    state
        .orchestrator
        .override_decision(project_id, vendor_id, receipt_id, decision)?
        .with_context(|| format!("Receipt {} not found for {}/{}", receipt_id, project_id, vendor_id))
}

pub fn record(
    state: &AppState,
    project_id: &str,
    vendor_id: &str,
    evidence: ManualEvidence,
) -> Result<ManualEvidenceOutcome> {
    Ok(state
        .orchestrator
        .record_manual_evidence(project_id, vendor_id, evidence)?)
}

pub fn enqueue(state: &AppState, name: &str, payload: Option<&str>) -> Result<JobTicket> {
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw).context("Payload is not valid JSON")?,
        None => Value::Null,
    };
    Ok(state.queue.enqueue(name, &payload))
}
