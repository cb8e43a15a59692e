use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::AuditError;
use crate::utils::{
    lenient_f64, lenient_opt_bool, lenient_opt_f64, lenient_opt_string, normalize_date,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    MathMismatch,
    TaxMismatch,
    TotalMismatch,
    InflationDetected,
    MissingGst,
    InvalidGstFormat,
    DuplicateInvoice,
    InvalidQr,
    DigitalOverlay,
    HighValueTransaction,
    VendorRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudSignal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub severity: Severity,
    pub description: String,
}

impl FraudSignal {
    pub fn new(signal_type: SignalType, severity: Severity, description: impl Into<String>) -> Self {
        FraudSignal {
            signal_type,
            severity,
            description: description.into(),
        }
    }
}

/// Receipt classification. Order of the bands: SAFE ≤ 20 < REVIEW ≤ 50 < FLAGGED ≤ 75 < FRAUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Safe,
    #[default]
    Review,
    Flagged,
    Fraud,
}

impl Decision {
    pub fn from_risk_score(score: u32) -> Self {
        match score {
            0..=20 => Decision::Safe,
            21..=50 => Decision::Review,
            51..=75 => Decision::Flagged,
            _ => Decision::Fraud,
        }
    }

    /// FLAGGED and FRAUD both count as fraud in ledger metrics.
    pub fn is_fraud(self) -> bool {
        matches!(self, Decision::Flagged | Decision::Fraud)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Safe => "SAFE",
            Decision::Review => "REVIEW",
            Decision::Flagged => "FLAGGED",
            Decision::Fraud => "FRAUD",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Decision::Safe),
            "REVIEW" => Ok(Decision::Review),
            "FLAGGED" => Ok(Decision::Flagged),
            "FRAUD" => Ok(Decision::Fraud),
            other => Err(AuditError::InvalidInput(format!("Unknown decision: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::High => "High",
            ConfidenceTier::Medium => "Medium",
            ConfidenceTier::Low => "Low",
        }
    }
}

impl FromStr for ConfidenceTier {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(ConfidenceTier::High),
            "medium" => Ok(ConfidenceTier::Medium),
            "low" => Ok(ConfidenceTier::Low),
            other => Err(AuditError::InvalidInput(format!("Unknown confidence: {}", other))),
        }
    }
}

fn lenient_opt_confidence<'de, D>(deserializer: D) -> Result<Option<ConfidenceTier>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_bool(deserializer)?.unwrap_or(false))
}

/// Field extraction result for one receipt image, coerced once at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFields {
    #[serde(alias = "invoiceNo", deserialize_with = "lenient_opt_string")]
    pub invoice_number: Option<String>,
    #[serde(alias = "invoiceDate", deserialize_with = "lenient_opt_string")]
    pub date: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub subtotal: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub cgst: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub sgst: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub grand_total: f64,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub line_items_sum: Option<f64>,
    #[serde(alias = "amountRaw", deserialize_with = "lenient_f64")]
    pub amount: f64,
    #[serde(
        alias = "gstNumber",
        alias = "gst",
        alias = "vendorGST",
        deserialize_with = "lenient_opt_string"
    )]
    pub vendor_gst: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub vendor_name: Option<String>,
    #[serde(deserialize_with = "lenient_opt_bool")]
    pub qr_valid: Option<bool>,
    #[serde(deserialize_with = "lenient_opt_confidence")]
    pub signature_confidence: Option<ConfidenceTier>,
    #[serde(deserialize_with = "lenient_flag")]
    pub duplicate_invoice: bool,
}

impl ExtractedFields {
    /// Defaults used when the vision provider is absent or fails.
    pub fn unreadable() -> Self {
        ExtractedFields {
            invoice_number: Some("UNKNOWN".to_string()),
            amount: 0.0,
            qr_valid: Some(true),
            ..Default::default()
        }
    }

    /// Line-item sum as the financial pillar sees it; missing or zero falls back to subtotal.
    pub fn effective_line_items_sum(&self) -> f64 {
        match self.line_items_sum {
            Some(sum) if sum != 0.0 => sum,
            _ => self.subtotal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorContext {
    pub fraud_flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PillarScore {
    pub score: f64,
    pub signals: Vec<FraudSignal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PillarScores {
    pub financial: f64,
    pub structural: f64,
    pub visual: f64,
    pub behavioral: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub scores: PillarScores,
    pub weighted_score: f64,
    pub hard_penalty: f64,
    pub final_risk_score: u32,
    pub fraud_signals: Vec<FraudSignal>,
}

impl RiskAssessment {
    pub fn has_signal(&self, signal_type: SignalType) -> bool {
        self.fraud_signals.iter().any(|s| s.signal_type == signal_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleOutcome {
    pub ml_score: u32,
    pub confidence: ConfidenceTier,
    pub logistic_prob: f64,
    pub vote_prob: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QrStatus {
    Valid,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Present,
    Missing,
}

/// The persisted, normalized subset of [`ExtractedFields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptExtract {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub amount_raw: f64,
    pub vendor_gst: Option<String>,
    pub vendor_name: Option<String>,
    pub currency: String,
    pub qr_status: QrStatus,
    pub signature_status: SignatureStatus,
    pub duplicate_invoice: bool,
}

impl ReceiptExtract {
    pub fn from_fields(fields: &ExtractedFields) -> Self {
        ReceiptExtract {
            invoice_number: fields.invoice_number.clone(),
            invoice_date: normalize_date(fields.date.clone()),
            amount_raw: fields.amount,
            vendor_gst: fields.vendor_gst.clone(),
            vendor_name: fields.vendor_name.clone(),
            currency: "INR".to_string(),
            qr_status: match fields.qr_valid {
                Some(true) => QrStatus::Valid,
                Some(false) => QrStatus::Invalid,
                None => QrStatus::Unknown,
            },
            signature_status: if fields.signature_confidence == Some(ConfidenceTier::Low) {
                SignatureStatus::Missing
            } else {
                SignatureStatus::Present
            },
            duplicate_invoice: false,
        }
    }
}

/// Mocked visual forensics derived from extraction flags; no pixel analysis happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualForensics {
    pub mocked: bool,
    pub signature: SignatureStatus,
    pub qr: QrStatus,
    pub overlay_suspected: bool,
}

impl VisualForensics {
    pub fn from_extract(extract: &ReceiptExtract) -> Self {
        VisualForensics {
            mocked: true,
            signature: extract.signature_status,
            qr: extract.qr_status,
            overlay_suspected: extract.signature_status == SignatureStatus::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub source: String,
    pub architecture: String,
    pub version: String,
    pub ensemble: Option<EnsembleOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_id: String,
    pub project_id: String,
    pub vendor_id: String,
    pub image_path: String,
    pub image_hash: Option<String>,
    pub uploaded_at: String,
    pub extracted_data: ReceiptExtract,
    pub scores: PillarScores,
    pub heuristic_score: u32,
    pub ml_score: u32,
    pub final_risk_score: u32,
    pub ai_decision: Decision,
    pub manual_decision: Option<Decision>,
    pub fraud_signals: Vec<FraudSignal>,
    pub confidence: ConfidenceTier,
    pub visual_forensics: Option<VisualForensics>,
    pub model_metadata: Option<ModelMetadata>,
}

impl Receipt {
    /// The manual override wins over the AI decision whenever one is set.
    pub fn effective_decision(&self) -> Decision {
        self.manual_decision.unwrap_or(self.ai_decision)
    }
}

/// Input to `EvidenceStore::add_receipt`.
#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub image_path: String,
    pub image_hash: Option<String>,
    pub extracted: ExtractedFields,
    pub scores: PillarScores,
    pub heuristic_score: u32,
    pub ml_score: u32,
    pub final_risk_score: u32,
    pub ai_decision: Decision,
    pub fraud_signals: Vec<FraudSignal>,
    pub confidence: ConfidenceTier,
    pub visual_forensics: Option<VisualForensics>,
    pub model_metadata: Option<ModelMetadata>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "UNDER REVIEW")]
    UnderReview,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDING",
            LedgerStatus::Active => "ACTIVE",
            LedgerStatus::UnderReview => "UNDER REVIEW",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub total_receipts: usize,
    pub fraud_count: usize,
    pub safe_count: usize,
    pub review_count: usize,
    pub total_claimed_amount: f64,
    pub fraud_amount: f64,
    pub verified_amount: f64,
    pub average_risk_score: u32,
    pub fraud_ratio: u32,
    pub project_risk_index: u32,
    pub status: LedgerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorMemory {
    pub project_id: String,
    pub vendor_id: String,
    pub receipts: Vec<Receipt>,
    pub totals: AggregateMetrics,
    pub conversation_history: Vec<ConversationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub receipt_id: String,
    pub date: String,
    pub invoice_no: String,
    pub amount: f64,
    pub risk_score: u32,
    pub decision: Decision,
    pub fraud_signals: Vec<String>,
}

/// Ledger facts injected into chat prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiContext {
    pub project_id: String,
    pub vendor_id: String,
    pub totals: AggregateMetrics,
    pub receipts: Vec<ReceiptSummary>,
    pub receipt_count: usize,
    pub invoice_numbers: Vec<String>,
    pub last_receipt: Option<ReceiptExtract>,
    pub last_updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decision_bands_partition_zero_to_hundred() {
        for score in 0..=100u32 {
            let expected = if score <= 20 {
                Decision::Safe
            } else if score <= 50 {
                Decision::Review
            } else if score <= 75 {
                Decision::Flagged
            } else {
                Decision::Fraud
            };
            assert_eq!(Decision::from_risk_score(score), expected, "score {}", score);
        }
        assert_eq!(Decision::from_risk_score(20), Decision::Safe);
        assert_eq!(Decision::from_risk_score(21), Decision::Review);
        assert_eq!(Decision::from_risk_score(50), Decision::Review);
        assert_eq!(Decision::from_risk_score(51), Decision::Flagged);
        assert_eq!(Decision::from_risk_score(75), Decision::Flagged);
        assert_eq!(Decision::from_risk_score(76), Decision::Fraud);
    }

    #[test]
    fn extracted_fields_coerce_garbage_to_defaults() {
        let fields: ExtractedFields = serde_json::from_value(json!({
            "invoiceNo": 4411,
            "subtotal": "1,000.00",
            "cgst": "abc",
            "sgst": null,
            "grandTotal": [1],
            "gstNumber": "  ",
            "qrValid": "false",
            "signatureConfidence": "LOW",
            "duplicateInvoice": "yes"
        }))
        .unwrap();

        assert_eq!(fields.invoice_number.as_deref(), Some("4411"));
        assert_eq!(fields.subtotal, 1000.0);
        assert_eq!(fields.cgst, 0.0);
        assert_eq!(fields.sgst, 0.0);
        assert_eq!(fields.grand_total, 0.0);
        assert_eq!(fields.line_items_sum, None);
        assert_eq!(fields.vendor_gst, None);
        assert_eq!(fields.qr_valid, Some(false));
        assert_eq!(fields.signature_confidence, Some(ConfidenceTier::Low));
        assert!(fields.duplicate_invoice);
    }

    #[test]
    fn line_items_sum_falls_back_to_subtotal() {
        let mut fields = ExtractedFields {
            subtotal: 500.0,
            ..Default::default()
        };
        assert_eq!(fields.effective_line_items_sum(), 500.0);
        fields.line_items_sum = Some(0.0);
        assert_eq!(fields.effective_line_items_sum(), 500.0);
        fields.line_items_sum = Some(480.0);
        assert_eq!(fields.effective_line_items_sum(), 480.0);
    }

    #[test]
    fn effective_decision_prefers_manual_override() {
        let mut receipt = Receipt {
            receipt_id: "REC-1-abcdef".to_string(),
            project_id: "p".to_string(),
            vendor_id: "v".to_string(),
            image_path: String::new(),
            image_hash: None,
            uploaded_at: "2025-01-01T00:00:00Z".to_string(),
            extracted_data: ReceiptExtract::from_fields(&ExtractedFields::default()),
            scores: PillarScores::default(),
            heuristic_score: 90,
            ml_score: 0,
            final_risk_score: 90,
            ai_decision: Decision::Fraud,
            manual_decision: None,
            fraud_signals: vec![],
            confidence: ConfidenceTier::High,
            visual_forensics: None,
            model_metadata: None,
        };
        assert_eq!(receipt.effective_decision(), Decision::Fraud);
        receipt.manual_decision = Some(Decision::Safe);
        assert_eq!(receipt.effective_decision(), Decision::Safe);
    }

    #[test]
    fn wire_names_match_the_ledger_format() {
        let signal = FraudSignal::new(SignalType::InvalidGstFormat, Severity::High, "bad");
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["type"], "INVALID_GST_FORMAT");
        assert_eq!(value["severity"], "HIGH");
        assert_eq!(serde_json::to_value(LedgerStatus::UnderReview).unwrap(), "UNDER REVIEW");
        assert_eq!(serde_json::to_value(ChatRole::Ai).unwrap(), "ai");
        assert_eq!("flagged".parse::<Decision>().unwrap(), Decision::Flagged);
        assert!("maybe".parse::<Decision>().is_err());
    }
}
