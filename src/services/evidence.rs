//! Append-only receipt ledgers keyed by (project, vendor), plus the metrics
//! derived from them.
//!
//! Every mutation runs under the store mutex inside one `IMMEDIATE`
//! transaction, so the duplicate scan and the insert it guards are atomic
//! with respect to any other writer in this process.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::db::evidence::{self as queries, ProcessingLog};
use crate::db::{Database, EVIDENCE_MIGRATIONS};
use crate::error::{AuditError, Result};
use crate::models::{
    AggregateMetrics, AiContext, Decision, FraudSignal, LedgerStatus, ModelMetadata, NewReceipt,
    PillarScores, Receipt, ReceiptExtract, ReceiptSummary, Severity, SignalType, VendorMemory,
};
use crate::services::conversation::ConversationStore;
use crate::utils::{finite_or_zero, new_receipt_id, now_rfc3339};

const DUPLICATE_BUMP: u32 = 25;
const CONTEXT_RECEIPTS: usize = 20;
const CONTEXT_SIGNALS: usize = 3;
const MEMORY_CHAT_ENTRIES: usize = 50;

#[derive(Clone)]
pub struct EvidenceStore {
    db: Arc<Mutex<Database>>,
}

impl EvidenceStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(EvidenceStore::new(Database::open(path, EVIDENCE_MIGRATIONS)?))
    }

    pub fn new(db: Database) -> Self {
        EvidenceStore {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| AuditError::LockPoisoned("evidence"))
    }

    /// Appends a receipt to the ledger. A prior receipt with the same
    /// non-null invoice number marks this one as a duplicate and bumps both
    /// score fields.
    pub fn add_receipt(&self, project_id: &str, vendor_id: &str, new: NewReceipt) -> Result<Receipt> {
        let mut extracted = ReceiptExtract::from_fields(&new.extracted);
        extracted.amount_raw = finite_or_zero(extracted.amount_raw);

        let mut receipt = Receipt {
            receipt_id: new_receipt_id(),
            project_id: project_id.to_string(),
            vendor_id: vendor_id.to_string(),
            image_path: new.image_path,
            image_hash: new.image_hash,
            uploaded_at: now_rfc3339(),
            extracted_data: extracted,
            scores: normalize_scores(new.scores),
            heuristic_score: new.heuristic_score.min(100),
            ml_score: new.ml_score.min(100),
            final_risk_score: new.final_risk_score.min(100),
            ai_decision: new.ai_decision,
            manual_decision: None,
            fraud_signals: new.fraud_signals,
            confidence: new.confidence,
            visual_forensics: new.visual_forensics,
            model_metadata: new.model_metadata.map(normalize_metadata),
        };

        let mut db = self.lock()?;
        let tx = db.write_transaction()?;

        if let Some(invoice) = receipt.extracted_data.invoice_number.clone() {
            if queries::invoice_exists(&tx, project_id, vendor_id, &invoice)? {
                receipt.extracted_data.duplicate_invoice = true;
                receipt.fraud_signals.push(FraudSignal::new(
                    SignalType::DuplicateInvoice,
                    Severity::High,
                    format!("Duplicate invoice number detected: {}", invoice),
                ));
                receipt.final_risk_score = (receipt.final_risk_score + DUPLICATE_BUMP).min(100);
                receipt.heuristic_score = (receipt.heuristic_score + DUPLICATE_BUMP).min(100);
                warn!(
                    project_id,
                    vendor_id,
                    invoice_number = %invoice,
                    "duplicate invoice number in ledger"
                );
            }
        }

        queries::insert_receipt(&tx, &receipt)?;
        let total = queries::count_receipts(&tx, project_id, vendor_id)?;
        tx.commit()?;

        info!(
            project_id,
            vendor_id,
            receipt_id = %receipt.receipt_id,
            score = receipt.final_risk_score,
            ml_score = receipt.ml_score,
            heuristic_score = receipt.heuristic_score,
            total_receipts = total,
            "receipt persisted"
        );
        Ok(receipt)
    }

    /// Sets the manual decision. `Ok(None)` when the receipt is not in this ledger.
    pub fn update_receipt_decision(
        &self,
        project_id: &str,
        vendor_id: &str,
        receipt_id: &str,
        decision: Decision,
    ) -> Result<Option<Receipt>> {
        let mut db = self.lock()?;
        let tx = db.write_transaction()?;
        let updated = queries::set_manual_decision(&tx, project_id, vendor_id, receipt_id, decision)?;
        if updated == 0 {
            drop(tx);
            warn!(project_id, vendor_id, receipt_id, "receipt not found for override");
            return Ok(None);
        }
        let receipt = queries::get_receipt(&tx, project_id, vendor_id, receipt_id)?;
        tx.commit()?;

        info!(project_id, vendor_id, receipt_id, decision = %decision, "manual decision applied");
        Ok(receipt)
    }

    pub fn get_receipt(&self, project_id: &str, vendor_id: &str, receipt_id: &str) -> Result<Option<Receipt>> {
        let db = self.lock()?;
        Ok(queries::get_receipt(db.conn(), project_id, vendor_id, receipt_id)?)
    }

    pub fn get_receipts(&self, project_id: &str, vendor_id: &str) -> Result<Vec<Receipt>> {
        let db = self.lock()?;
        Ok(queries::list_receipts(db.conn(), project_id, vendor_id)?)
    }

    pub fn find_duplicate_image(
        &self,
        project_id: &str,
        vendor_id: &str,
        image_hash: &str,
    ) -> Result<Option<String>> {
        let db = self.lock()?;
        Ok(queries::find_by_image_hash(db.conn(), project_id, vendor_id, image_hash)?)
    }

    pub fn get_computed_totals(&self, project_id: &str, vendor_id: &str) -> Result<AggregateMetrics> {
        Ok(compute_totals(&self.get_receipts(project_id, vendor_id)?))
    }

    /// Receipts, totals and the newest chat entries in one read.
    pub fn get_vendor_memory(
        &self,
        project_id: &str,
        vendor_id: &str,
        conversations: &ConversationStore,
    ) -> Result<VendorMemory> {
        let receipts = self.get_receipts(project_id, vendor_id)?;
        let totals = compute_totals(&receipts);
        let conversation_history =
            conversations.get_recent_history(project_id, vendor_id, MEMORY_CHAT_ENTRIES)?;

        Ok(VendorMemory {
            project_id: project_id.to_string(),
            vendor_id: vendor_id.to_string(),
            receipts,
            totals,
            conversation_history,
        })
    }

    pub fn build_ai_context(&self, project_id: &str, vendor_id: &str) -> Result<AiContext> {
        let receipts = self.get_receipts(project_id, vendor_id)?;
        Ok(build_ai_context(project_id, vendor_id, &receipts))
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.lock()?;
        Ok(queries::get_setting(db.conn(), key)?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.lock()?;
        Ok(queries::set_setting(db.conn(), key, value)?)
    }

    pub fn log_processing(&self, entry: &ProcessingLog<'_>) -> Result<()> {
        let db = self.lock()?;
        Ok(queries::log_processing(db.conn(), entry)?)
    }

    pub fn count_processing_logs(&self, project_id: &str, vendor_id: &str, process_type: &str) -> Result<usize> {
        let db = self.lock()?;
        Ok(queries::count_processing_logs(db.conn(), project_id, vendor_id, process_type)?)
    }
}

/// Ledger metrics from the effective decision of every receipt.
/// An empty ledger yields zeros and `PENDING`.
/// Pillar scores go to JSON columns, where a NaN would be written as `null`
/// and fail to load later.
fn normalize_scores(scores: PillarScores) -> PillarScores {
    let pillar = |value: f64| finite_or_zero(value).clamp(0.0, 100.0);
    PillarScores {
        financial: pillar(scores.financial),
        structural: pillar(scores.structural),
        visual: pillar(scores.visual),
        behavioral: pillar(scores.behavioral),
    }
}

fn normalize_metadata(mut metadata: ModelMetadata) -> ModelMetadata {
    if let Some(ensemble) = metadata.ensemble.as_mut() {
        ensemble.logistic_prob = finite_or_zero(ensemble.logistic_prob).clamp(0.0, 1.0);
        ensemble.vote_prob = finite_or_zero(ensemble.vote_prob).clamp(0.0, 1.0);
    }
    metadata
}

pub fn compute_totals(receipts: &[Receipt]) -> AggregateMetrics {
    let total = receipts.len();
    if total == 0 {
        return AggregateMetrics::default();
    }

    let mut metrics = AggregateMetrics {
        total_receipts: total,
        ..Default::default()
    };
    let mut risk_sum = 0u64;

    for receipt in receipts {
        let amount = finite_or_zero(receipt.extracted_data.amount_raw);
        metrics.total_claimed_amount += amount;
        risk_sum += u64::from(receipt.final_risk_score);

        match receipt.effective_decision() {
            d if d.is_fraud() => {
                metrics.fraud_count += 1;
                metrics.fraud_amount += amount;
            }
            Decision::Safe => {
                metrics.safe_count += 1;
                metrics.verified_amount += amount;
            }
            _ => metrics.review_count += 1,
        }
    }

    let average = (risk_sum as f64 / total as f64).round();
    let fraud_ratio = metrics.fraud_count as f64 / total as f64 * 100.0;

    metrics.average_risk_score = average as u32;
    metrics.fraud_ratio = fraud_ratio.round() as u32;
    metrics.project_risk_index = ((average + fraud_ratio) / 2.0).round() as u32;
    metrics.status = if metrics.fraud_count > 0 {
        LedgerStatus::UnderReview
    } else {
        LedgerStatus::Active
    };
    metrics
}

pub fn build_ai_context(project_id: &str, vendor_id: &str, receipts: &[Receipt]) -> AiContext {
    let skip = receipts.len().saturating_sub(CONTEXT_RECEIPTS);
    let summaries = receipts[skip..]
        .iter()
        .map(|r| ReceiptSummary {
            receipt_id: r.receipt_id.clone(),
            date: r.uploaded_at.clone(),
            invoice_no: r
                .extracted_data
                .invoice_number
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            amount: r.extracted_data.amount_raw,
            risk_score: r.final_risk_score,
            decision: r.effective_decision(),
            fraud_signals: r
                .fraud_signals
                .iter()
                .take(CONTEXT_SIGNALS)
                .map(|s| s.description.clone())
                .collect(),
        })
        .collect();

    let last = receipts.last();
    AiContext {
        project_id: project_id.to_string(),
        vendor_id: vendor_id.to_string(),
        totals: compute_totals(receipts),
        receipts: summaries,
        receipt_count: receipts.len(),
        invoice_numbers: receipts
            .iter()
            .filter_map(|r| r.extracted_data.invoice_number.clone())
            .collect(),
        last_receipt: last.map(|r| r.extracted_data.clone()),
        last_updated: last.map(|r| r.uploaded_at.clone()),
    }
}
