//! Four-pillar heuristic scorer with hard-rule penalties.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::config::DEFAULT_HIGH_VALUE_THRESHOLD;
use crate::models::{
    ConfidenceTier, ExtractedFields, FraudSignal, PillarScore, PillarScores, RiskAssessment,
    Severity, SignalType, VendorContext,
};
use crate::utils::finite_or_zero;

const TOLERANCE: f64 = 1.0;
const GST_RATE: f64 = 0.09;
const INFLATION_LIMIT: f64 = 1.25;

const WEIGHT_FINANCIAL: f64 = 0.35;
const WEIGHT_STRUCTURAL: f64 = 0.25;
const WEIGHT_VISUAL: f64 = 0.20;
const WEIGHT_BEHAVIORAL: f64 = 0.20;

const HARD_RULES: [(SignalType, f64); 6] = [
    (SignalType::MissingGst, 40.0),
    (SignalType::DuplicateInvoice, 35.0),
    (SignalType::TotalMismatch, 30.0),
    (SignalType::InvalidGstFormat, 25.0),
    (SignalType::InvalidQr, 20.0),
    (SignalType::DigitalOverlay, 20.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    pub high_value_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            high_value_threshold: DEFAULT_HIGH_VALUE_THRESHOLD,
        }
    }
}

fn gst_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{2}[A-Z]{5}\d{4}[A-Z][A-Z0-9]Z[A-Z0-9]$").expect("static GST pattern")
    })
}

pub fn is_valid_gst(gst: &str) -> bool {
    gst_pattern().is_match(gst)
}

/// Arithmetic consistency checks; penalties stack and cap at 100.
pub fn financial_score(fields: &ExtractedFields) -> PillarScore {
    let subtotal = finite_or_zero(fields.subtotal);
    let cgst = finite_or_zero(fields.cgst);
    let sgst = finite_or_zero(fields.sgst);
    let grand_total = finite_or_zero(fields.grand_total);
    let line_items_sum = finite_or_zero(fields.effective_line_items_sum());

    let mut score = 0.0;
    let mut signals = Vec::new();

    if (line_items_sum - subtotal).abs() > TOLERANCE {
        score += 30.0;
        signals.push(FraudSignal::new(
            SignalType::MathMismatch,
            Severity::High,
            format!("Line items total ({}) != Subtotal ({})", line_items_sum, subtotal),
        ));
    }

    let expected_tax = subtotal * GST_RATE;
    if (cgst - expected_tax).abs() > TOLERANCE {
        score += 25.0;
        signals.push(FraudSignal::new(
            SignalType::TaxMismatch,
            Severity::Medium,
            "CGST is not 9% of subtotal",
        ));
    }
    if (sgst - expected_tax).abs() > TOLERANCE {
        score += 25.0;
        signals.push(FraudSignal::new(
            SignalType::TaxMismatch,
            Severity::Medium,
            "SGST is not 9% of subtotal",
        ));
    }

    if (grand_total - (subtotal + cgst + sgst)).abs() > TOLERANCE {
        score += 40.0;
        signals.push(FraudSignal::new(
            SignalType::TotalMismatch,
            Severity::Critical,
            format!("Grand Total ({}) violates sum check", grand_total),
        ));
    }

    if line_items_sum > 0.0 && grand_total / line_items_sum > INFLATION_LIMIT {
        score += 30.0;
        signals.push(FraudSignal::new(
            SignalType::InflationDetected,
            Severity::High,
            format!("Inflation ratio > {}", INFLATION_LIMIT),
        ));
    }

    PillarScore {
        score: f64::min(100.0, score),
        signals,
    }
}

/// Identity checks. Each trigger sets the score outright; the highest wins.
pub fn structural_score(fields: &ExtractedFields) -> PillarScore {
    let mut score: f64 = 0.0;
    let mut signals = Vec::new();

    match fields.vendor_gst.as_deref() {
        None => {
            score = 100.0;
            signals.push(FraudSignal::new(
                SignalType::MissingGst,
                Severity::Critical,
                "GST Number Missing",
            ));
        }
        Some(gst) if !is_valid_gst(gst) => {
            score = 80.0;
            signals.push(FraudSignal::new(
                SignalType::InvalidGstFormat,
                Severity::High,
                "GST Pattern Invalid",
            ));
        }
        Some(_) => {}
    }

    if fields.duplicate_invoice {
        score = 100.0;
        signals.push(FraudSignal::new(
            SignalType::DuplicateInvoice,
            Severity::Critical,
            "Duplicate Invoice ID",
        ));
    }

    PillarScore { score, signals }
}

/// Mocked forensics driven by the QR and signature flags.
pub fn visual_score(fields: &ExtractedFields) -> PillarScore {
    let mut score = 0.0;
    let mut signals = Vec::new();

    if fields.qr_valid == Some(false) {
        score += 50.0;
        signals.push(FraudSignal::new(
            SignalType::InvalidQr,
            Severity::Medium,
            "QR Code Readability Fail",
        ));
    }

    if fields.signature_confidence == Some(ConfidenceTier::Low) {
        score += 40.0;
        signals.push(FraudSignal::new(
            SignalType::DigitalOverlay,
            Severity::High,
            "Potential digital signature overlay",
        ));
    }

    PillarScore {
        score: f64::min(100.0, score),
        signals,
    }
}

pub fn behavioral_score(
    fields: &ExtractedFields,
    vendor: &VendorContext,
    high_value_threshold: f64,
) -> PillarScore {
    let mut score = 0.0;
    let mut signals = Vec::new();

    if finite_or_zero(fields.grand_total) > high_value_threshold {
        score += 40.0;
        signals.push(FraudSignal::new(
            SignalType::HighValueTransaction,
            Severity::Medium,
            format!("Amount > {} INR", high_value_threshold),
        ));
    }

    if vendor.fraud_flags > 0 {
        score += f64::from(vendor.fraud_flags) * 20.0;
        signals.push(FraudSignal::new(
            SignalType::VendorRisk,
            Severity::High,
            format!("Vendor has {} flags", vendor.fraud_flags),
        ));
    }

    PillarScore {
        score: f64::min(100.0, score),
        signals,
    }
}

/// Largest hard-rule penalty among the triggered signals; rules do not stack.
pub fn hard_penalty(signals: &[FraudSignal]) -> f64 {
    HARD_RULES
        .iter()
        .filter(|(rule, _)| signals.iter().any(|s| s.signal_type == *rule))
        .map(|(_, penalty)| *penalty)
        .fold(0.0, f64::max)
}

pub fn weighted_score(scores: &PillarScores) -> f64 {
    scores.financial * WEIGHT_FINANCIAL
        + scores.structural * WEIGHT_STRUCTURAL
        + scores.visual * WEIGHT_VISUAL
        + scores.behavioral * WEIGHT_BEHAVIORAL
}

/// Runs all four pillars and combines them. The hard penalty is added on top
/// of the weighted composite before clamping, so it can saturate at 100.
pub fn analyze(
    fields: &ExtractedFields,
    vendor: &VendorContext,
    config: &ScoringConfig,
) -> RiskAssessment {
    let financial = financial_score(fields);
    let structural = structural_score(fields);
    let visual = visual_score(fields);
    let behavioral = behavioral_score(fields, vendor, config.high_value_threshold);

    let scores = PillarScores {
        financial: financial.score,
        structural: structural.score,
        visual: visual.score,
        behavioral: behavioral.score,
    };

    let fraud_signals: Vec<FraudSignal> = [financial, structural, visual, behavioral]
        .into_iter()
        .flat_map(|pillar| pillar.signals)
        .collect();

    let weighted = weighted_score(&scores);
    let penalty = hard_penalty(&fraud_signals);
    let final_risk_score = (weighted + penalty).round().clamp(0.0, 100.0) as u32;

    debug!(
        financial = scores.financial,
        structural = scores.structural,
        visual = scores.visual,
        behavioral = scores.behavioral,
        weighted,
        penalty,
        final_risk_score,
        "heuristic assessment"
    );

    RiskAssessment {
        scores,
        weighted_score: weighted,
        hard_penalty: penalty,
        final_risk_score,
        fraud_signals,
    }
}
