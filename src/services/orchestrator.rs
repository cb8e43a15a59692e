//! Receipt lifecycle: extraction, scoring, classification, persistence.
//! Also the ledger-aware chat path.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::evidence::ProcessingLog;
use crate::error::{AuditError, Result};
use crate::models::{
    AggregateMetrics, AiContext, ChatRole, ConfidenceTier, ConversationEntry, Decision,
    EnsembleOutcome, ExtractedFields, FraudSignal, ModelMetadata, NewReceipt, Receipt,
    ReceiptExtract, VendorContext, VendorMemory, VisualForensics,
};
use crate::services::completion::{parse_reply, CompletionProvider};
use crate::services::conversation::ConversationStore;
use crate::services::ensemble::EnsembleScorer;
use crate::services::evidence::EvidenceStore;
use crate::services::scoring::{self, ScoringConfig};
use crate::services::vision::{VisionExtraction, VisionProvider};
use crate::utils::{finite_or_zero, format_decimal, now_rfc3339, sha256_bytes};

const ENGINE_SOURCE: &str = "FraudEngineV3";
const ENGINE_ARCHITECTURE: &str = "4-Pillar-Defensive";
const ENGINE_VERSION: &str = "3.0";
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

const KEY_MISSING_SUMMARY: &str = "AI Key Missing";
const KEY_MISSING_RAW: &str = "System Error: No API Key";
const CONNECT_ERROR_RAW: &str = "Error connecting to AI";

const CHAT_SYSTEM_PROMPT: &str = r#"You are a forensic audit assistant for government procurement.
Base every statement on the extracted receipt data and the ledger facts below.
Recompute totals and GST components yourself; never assume a value.
If the evidence is inconclusive, classify as REVIEW. Do not invent receipts.
Always cite receipt IDs and invoice numbers when you refer to a receipt.

Reply with one JSON object:
{
  "decision": "SAFE | REVIEW | FRAUD",
  "confidence": "High | Medium | Low",
  "ruleScore": <number>,
  "mlScore": <number>,
  "finalScore": <number>,
  "financialValidation": { "taxMatch": <boolean>, "totalMatch": <boolean> },
  "fraudSignals": [<string>],
  "analysisSummary": <string>,
  "memoryContext": { "totalReceipts": <number>, "fraudCount": <number>, "verifiedCount": <number>, "totalClaimed": <number>, "fraudAmount": <number> }
}
"#;

/// One receipt image submitted for scoring.
#[derive(Debug, Clone, Default)]
pub struct ReceiptUpload {
    pub image_path: String,
    pub image: Vec<u8>,
    pub mime_type: String,
    pub vendor: VendorContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub receipt_id: String,
    pub status: Decision,
    pub risk_score: u32,
    pub fraud_signals: Vec<FraudSignal>,
    pub extracted_fields: ReceiptExtract,
    /// Extraction confidence; `Low` means the provider was unavailable.
    pub confidence: ConfidenceTier,
    pub analysis_summary: String,
    pub ml: EnsembleOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_image_of: Option<String>,
}

/// A receipt recorded by hand, or a decision on an existing one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManualEvidence {
    pub receipt_id: Option<String>,
    pub image_path: String,
    pub amount: f64,
    pub risk_score: f64,
    pub fraud_signals: Vec<FraudSignal>,
    pub marked_as: Option<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEvidenceOutcome {
    pub record: Receipt,
    pub totals: AggregateMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub tool_name: Option<String>,
    pub receipt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub result: Value,
    pub raw: String,
    pub memory_snapshot: AiContext,
}

pub struct Orchestrator {
    evidence: EvidenceStore,
    conversations: ConversationStore,
    vision: Option<Arc<dyn VisionProvider>>,
    completion: Option<Arc<dyn CompletionProvider>>,
    ensemble: EnsembleScorer,
    scoring: ScoringConfig,
    provider_timeout: Duration,
    visual_forensics: bool,
}

impl Orchestrator {
    pub fn new(evidence: EvidenceStore, conversations: ConversationStore) -> Self {
        Orchestrator {
            evidence,
            conversations,
            vision: None,
            completion: None,
            ensemble: EnsembleScorer::default(),
            scoring: ScoringConfig::default(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            visual_forensics: true,
        }
    }

    pub fn with_vision(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.vision = Some(provider);
        self
    }

    pub fn with_completion(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(provider);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_ensemble(mut self, ensemble: EnsembleScorer) -> Self {
        self.ensemble = ensemble;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_visual_forensics(mut self, enabled: bool) -> Self {
        self.visual_forensics = enabled;
        self
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn get_vendor_memory(&self, project_id: &str, vendor_id: &str) -> Result<VendorMemory> {
        self.evidence.get_vendor_memory(project_id, vendor_id, &self.conversations)
    }

    async fn extract(&self, upload: &ReceiptUpload) -> VisionExtraction {
        let Some(provider) = self.vision.as_ref() else {
            warn!("no vision provider configured, using unreadable defaults");
            return VisionExtraction::unreadable();
        };

        let call = provider.extract(&upload.image, &upload.mime_type, &upload.vendor);
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(err)) => {
                warn!(error = %err, image = %upload.image_path, "vision provider failed, degrading");
                VisionExtraction::unreadable()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.provider_timeout.as_secs_f64(),
                    image = %upload.image_path,
                    "vision provider timed out, degrading"
                );
                VisionExtraction::unreadable()
            }
        }
    }

    pub async fn process_receipt(
        &self,
        project_id: &str,
        vendor_id: &str,
        upload: ReceiptUpload,
    ) -> Result<ProcessOutcome> {
        let image_hash = sha256_bytes(&upload.image);
        let duplicate_image_of = self
            .evidence
            .find_duplicate_image(project_id, vendor_id, &image_hash)?;

        let extraction = self.extract(&upload).await;
        let fields = extraction.fields;

        let assessment = scoring::analyze(&fields, &upload.vendor, &self.scoring);
        let ml = self.ensemble.score_assessment(&assessment);
        let risk_score = assessment.final_risk_score;
        let status = Decision::from_risk_score(risk_score);

        let visual_forensics = self
            .visual_forensics
            .then(|| VisualForensics::from_extract(&ReceiptExtract::from_fields(&fields)));

        let mut fraud_signals = extraction.signals;
        fraud_signals.extend(assessment.fraud_signals.iter().cloned());

        let receipt = self.evidence.add_receipt(
            project_id,
            vendor_id,
            NewReceipt {
                image_path: upload.image_path.clone(),
                image_hash: Some(image_hash),
                extracted: fields,
                scores: assessment.scores,
                heuristic_score: risk_score,
                ml_score: ml.ml_score,
                final_risk_score: risk_score,
                ai_decision: status,
                fraud_signals,
                confidence: if risk_score > 50 {
                    ConfidenceTier::High
                } else {
                    ConfidenceTier::Medium
                },
                visual_forensics,
                model_metadata: Some(ModelMetadata {
                    source: ENGINE_SOURCE.to_string(),
                    architecture: ENGINE_ARCHITECTURE.to_string(),
                    version: ENGINE_VERSION.to_string(),
                    ensemble: Some(ml.clone()),
                }),
            },
        )?;

        let scores = &assessment.scores;
        let analysis_summary = format!(
            "Risk {}/100. Financial {} | Structural {} | Visual {} | Behavioral {}",
            risk_score, scores.financial, scores.structural, scores.visual, scores.behavioral
        );

        if let Some(original) = duplicate_image_of.as_deref() {
            warn!(
                project_id,
                vendor_id,
                receipt_id = %receipt.receipt_id,
                original,
                "image already submitted to this ledger"
            );
        }

        info!(
            project_id,
            vendor_id,
            receipt_id = %receipt.receipt_id,
            status = %status,
            score = risk_score,
            ml_score = ml.ml_score,
            "receipt processed"
        );

        self.after_commit(ProcessingLog {
            receipt_id: Some(&receipt.receipt_id),
            project_id,
            vendor_id,
            process_type: "process",
            status: status.as_str(),
            message: Some(&analysis_summary),
        });

        Ok(ProcessOutcome {
            receipt_id: receipt.receipt_id,
            status,
            risk_score,
            fraud_signals: receipt.fraud_signals,
            extracted_fields: receipt.extracted_data,
            confidence: extraction.confidence,
            analysis_summary,
            ml,
            duplicate_image_of,
        })
    }

    pub fn override_decision(
        &self,
        project_id: &str,
        vendor_id: &str,
        receipt_id: &str,
        decision: Decision,
    ) -> Result<Option<Receipt>> {
        let updated = self
            .evidence
            .update_receipt_decision(project_id, vendor_id, receipt_id, decision)?;
        if updated.is_some() {
            self.after_commit(ProcessingLog {
                receipt_id: Some(receipt_id),
                project_id,
                vendor_id,
                process_type: "override",
                status: decision.as_str(),
                message: None,
            });
        }
        Ok(updated)
    }

    /// Marks an existing receipt when `receipt_id` names one in the ledger,
    /// otherwise stores a new receipt without extraction.
    pub fn record_manual_evidence(
        &self,
        project_id: &str,
        vendor_id: &str,
        evidence: ManualEvidence,
    ) -> Result<ManualEvidenceOutcome> {
        if let (Some(receipt_id), Some(decision)) = (evidence.receipt_id.as_deref(), evidence.marked_as) {
            if let Some(record) = self.override_decision(project_id, vendor_id, receipt_id, decision)? {
                let totals = self.evidence.get_computed_totals(project_id, vendor_id)?;
                return Ok(ManualEvidenceOutcome { record, totals });
            }
        }

        let score = finite_or_zero(evidence.risk_score).round().clamp(0.0, 100.0) as u32;
        let ai_decision = evidence.marked_as.unwrap_or(Decision::Review);
        let record = self.evidence.add_receipt(
            project_id,
            vendor_id,
            NewReceipt {
                image_path: evidence.image_path,
                extracted: ExtractedFields {
                    amount: finite_or_zero(evidence.amount),
                    ..Default::default()
                },
                heuristic_score: score,
                final_risk_score: score,
                ai_decision,
                fraud_signals: evidence.fraud_signals,
                confidence: ConfidenceTier::Medium,
                ..Default::default()
            },
        )?;

        self.after_commit(ProcessingLog {
            receipt_id: Some(&record.receipt_id),
            project_id,
            vendor_id,
            process_type: "record",
            status: ai_decision.as_str(),
            message: None,
        });

        let totals = self.evidence.get_computed_totals(project_id, vendor_id)?;
        Ok(ManualEvidenceOutcome { record, totals })
    }

    /// Answers a free-text question about the ledger. Provider problems come
    /// back as a well-formed reply, never as an error.
    pub async fn chat(&self, project_id: &str, vendor_id: &str, request: ChatRequest) -> Result<ChatReply> {
        let message = request.message.trim().to_string();
        let tool_name = request.tool_name.filter(|t| !t.trim().is_empty());
        let user_text = match (message.is_empty(), tool_name.as_deref()) {
            (false, _) => message,
            (true, Some(tool)) => format!("Run tool: {}", tool),
            (true, None) => {
                return Err(AuditError::InvalidInput("message or toolName required".to_string()))
            }
        };

        let context = self.evidence.build_ai_context(project_id, vendor_id)?;
        self.remember(project_id, vendor_id, ChatRole::User, &user_text, &tool_name, &request.receipt_id);

        let system_prompt = chat_system_prompt(&context, &user_text);
        let (result, raw) = match self.completion.as_ref() {
            None => key_missing(),
            Some(provider) => {
                let call = provider.complete(&system_prompt, &user_text);
                match tokio::time::timeout(self.provider_timeout, call).await {
                    Ok(Ok(text)) => (parse_reply(&text), text),
                    Ok(Err(AuditError::MissingApiKey)) => key_missing(),
                    Ok(Err(err)) => {
                        warn!(project_id, vendor_id, error = %err, "chat provider failed");
                        (json!({ "error": err.to_string() }), CONNECT_ERROR_RAW.to_string())
                    }
                    Err(_) => {
                        warn!(project_id, vendor_id, "chat provider timed out");
                        (json!({ "error": "Provider timed out" }), CONNECT_ERROR_RAW.to_string())
                    }
                }
            }
        };

        self.remember(project_id, vendor_id, ChatRole::Ai, &raw, &tool_name, &request.receipt_id);

        Ok(ChatReply {
            result,
            raw,
            memory_snapshot: context,
        })
    }

    fn remember(
        &self,
        project_id: &str,
        vendor_id: &str,
        role: ChatRole,
        content: &str,
        tool_name: &Option<String>,
        receipt_id: &Option<String>,
    ) {
        let entry = ConversationEntry {
            role,
            content: content.to_string(),
            timestamp: now_rfc3339(),
            tool_name: tool_name.clone(),
            receipt_id: receipt_id.clone(),
        };
        if let Err(err) = self.conversations.save_chat_message(project_id, vendor_id, &entry) {
            warn!(project_id, vendor_id, error = %err, "chat history write failed");
        }
    }

    /// Post-commit audit hook. Failures are logged and never fail the operation.
    fn after_commit(&self, entry: ProcessingLog<'_>) {
        if let Err(err) = self.evidence.log_processing(&entry) {
            warn!(
                process_type = entry.process_type,
                project_id = entry.project_id,
                error = %err,
                "processing log write failed"
            );
        }
    }
}

fn key_missing() -> (Value, String) {
    (
        json!({ "analysisSummary": KEY_MISSING_SUMMARY }),
        KEY_MISSING_RAW.to_string(),
    )
}

/// System prompt with the ledger facts the model must trust over its own memory.
pub fn chat_system_prompt(context: &AiContext, user_text: &str) -> String {
    let totals = &context.totals;
    let last_receipt = context
        .last_receipt
        .as_ref()
        .and_then(|r| serde_json::to_string(r).ok())
        .unwrap_or_else(|| "None".to_string());
    let receipts = serde_json::to_string(&context.receipts).unwrap_or_else(|_| "[]".to_string());

    format!(
        "{prompt}
LEDGER FACTS (authoritative):
- Project: {project} / Vendor: {vendor}
- Total receipts uploaded: {count}
- Total claimed amount: INR {claimed}
- Fraud count: {fraud} (amount INR {fraud_amount})
- Verified count: {safe}
- Average risk score: {avg}
- Project risk index: {index} ({status})
- Last receipt: {last_receipt}
- Recent receipts: {receipts}

USER QUERY: {query:?}

When asked about receipts, use the receipt count above; never report zero receipts when it is positive.
Known invoice numbers: {invoices}.
",
        prompt = CHAT_SYSTEM_PROMPT,
        project = context.project_id,
        vendor = context.vendor_id,
        count = context.receipt_count,
        claimed = format_decimal(totals.total_claimed_amount),
        fraud = totals.fraud_count,
        fraud_amount = format_decimal(totals.fraud_amount),
        safe = totals.safe_count,
        avg = totals.average_risk_score,
        index = totals.project_risk_index,
        status = totals.status.as_str(),
        last_receipt = last_receipt,
        receipts = receipts,
        query = user_text,
        invoices = context.invoice_numbers.join(", "),
    )
}
