//! Fixed-weight probabilistic scorers. Their output is advisory metadata only.

use crate::models::{ConfidenceTier, EnsembleOutcome, RiskAssessment, SignalType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlFeatures {
    /// Inverted financial pillar, `(100 - financial) / 100`.
    pub financial_score: f64,
    pub tax_mismatch: bool,
    pub duplicate_flag: bool,
    pub overlay_score: f64,
    pub inflation_ratio: f64,
    pub qr_valid: bool,
    pub time_gap_hours: Option<f64>,
    pub template_similarity: f64,
}

impl MlFeatures {
    pub fn from_assessment(assessment: &RiskAssessment) -> Self {
        let scores = &assessment.scores;
        MlFeatures {
            financial_score: (100.0 - scores.financial) / 100.0,
            tax_mismatch: scores.financial > 0.0,
            duplicate_flag: assessment.has_signal(SignalType::DuplicateInvoice),
            overlay_score: if scores.visual > 0.0 { 0.8 } else { 0.0 },
            // The financial pillar already checks inflation.
            inflation_ratio: 1.0,
            qr_valid: scores.visual < 50.0,
            time_gap_hours: None,
            template_similarity: 0.0,
        }
    }
}

pub trait RiskModel: Send + Sync {
    /// Fraud probability in `[0, 1]`.
    fn predict(&self, features: &MlFeatures) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticModel {
    pub bias: f64,
    pub financial_score: f64,
    pub tax_mismatch: f64,
    pub duplicate_flag: f64,
    pub overlay_score: f64,
    pub inflation_ratio: f64,
    pub qr_valid: f64,
}

impl Default for LogisticModel {
    fn default() -> Self {
        LogisticModel {
            bias: -4.0,
            financial_score: 0.8,
            tax_mismatch: 2.5,
            duplicate_flag: 3.0,
            overlay_score: 2.0,
            inflation_ratio: 1.5,
            qr_valid: -1.0,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

impl RiskModel for LogisticModel {
    fn predict(&self, f: &MlFeatures) -> f64 {
        let z = self.bias
            + f.financial_score * self.financial_score
            + indicator(f.tax_mismatch) * self.tax_mismatch
            + indicator(f.duplicate_flag) * self.duplicate_flag
            + f.overlay_score * self.overlay_score
            + f.inflation_ratio * self.inflation_ratio
            + indicator(f.qr_valid) * self.qr_valid;
        sigmoid(z)
    }
}

/// Five independent boolean rules; the probability is the vote share.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoteModel;

impl RiskModel for VoteModel {
    fn predict(&self, f: &MlFeatures) -> f64 {
        let votes = [
            f.tax_mismatch && f.inflation_ratio > 1.05,
            f.duplicate_flag || f.time_gap_hours.is_some_and(|gap| gap < 2.0),
            f.overlay_score > 0.7,
            f.template_similarity > 0.85,
            !f.qr_valid && f.financial_score > 0.5,
        ];
        votes.iter().filter(|&&v| v).count() as f64 / votes.len() as f64
    }
}

pub struct EnsembleScorer {
    logistic: Box<dyn RiskModel>,
    votes: Box<dyn RiskModel>,
}

impl Default for EnsembleScorer {
    fn default() -> Self {
        EnsembleScorer::new(Box::new(LogisticModel::default()), Box::new(VoteModel))
    }
}

impl EnsembleScorer {
    pub fn new(logistic: Box<dyn RiskModel>, votes: Box<dyn RiskModel>) -> Self {
        EnsembleScorer { logistic, votes }
    }

    pub fn score(&self, features: &MlFeatures) -> EnsembleOutcome {
        let logistic_prob = self.logistic.predict(features).clamp(0.0, 1.0);
        let vote_prob = self.votes.predict(features).clamp(0.0, 1.0);
        let ml_score = (((logistic_prob + vote_prob) / 2.0) * 100.0).round() as u32;
        let confidence = if ml_score > 80 || ml_score < 20 {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Medium
        };

        EnsembleOutcome {
            ml_score,
            confidence,
            logistic_prob,
            vote_prob,
        }
    }

    pub fn score_assessment(&self, assessment: &RiskAssessment) -> EnsembleOutcome {
        self.score(&MlFeatures::from_assessment(assessment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FraudSignal, PillarScores, Severity};

    fn assessment(scores: PillarScores, signals: Vec<FraudSignal>) -> RiskAssessment {
        RiskAssessment {
            scores,
            weighted_score: 0.0,
            hard_penalty: 0.0,
            final_risk_score: 0,
            fraud_signals: signals,
        }
    }

    #[test]
    fn clean_assessment_is_low_and_confident() {
        let outcome = EnsembleScorer::default().score_assessment(&assessment(PillarScores::default(), vec![]));
        // z = -4 + 0.8 + 1.5 - 1.0 = -2.7
        assert!((outcome.logistic_prob - 0.0629).abs() < 1e-3);
        assert_eq!(outcome.vote_prob, 0.0);
        assert_eq!(outcome.ml_score, 3);
        assert_eq!(outcome.confidence, ConfidenceTier::High);
    }

    #[test]
    fn features_follow_pillar_outputs() {
        let a = assessment(
            PillarScores {
                financial: 70.0,
                structural: 100.0,
                visual: 50.0,
                behavioral: 0.0,
            },
            vec![FraudSignal::new(SignalType::DuplicateInvoice, Severity::Critical, "dup")],
        );
        let f = MlFeatures::from_assessment(&a);
        assert!((f.financial_score - 0.3).abs() < 1e-9);
        assert!(f.tax_mismatch);
        assert!(f.duplicate_flag);
        assert_eq!(f.overlay_score, 0.8);
        assert!(!f.qr_valid);
        assert_eq!(f.inflation_ratio, 1.0);
    }

    #[test]
    fn vote_model_counts_rules() {
        let mut f = MlFeatures {
            financial_score: 0.9,
            tax_mismatch: true,
            duplicate_flag: false,
            overlay_score: 0.0,
            inflation_ratio: 1.0,
            qr_valid: true,
            time_gap_hours: None,
            template_similarity: 0.0,
        };
        assert_eq!(VoteModel.predict(&f), 0.0);

        f.inflation_ratio = 1.2;
        f.overlay_score = 0.8;
        f.qr_valid = false;
        f.time_gap_hours = Some(1.5);
        f.template_similarity = 0.9;
        assert_eq!(VoteModel.predict(&f), 1.0);

        f.time_gap_hours = Some(5.0);
        assert_eq!(VoteModel.predict(&f), 0.8);
    }

    #[test]
    fn mid_range_ensemble_is_medium_confidence() {
        struct Fixed(f64);
        impl RiskModel for Fixed {
            fn predict(&self, _: &MlFeatures) -> f64 {
                self.0
            }
        }
        let scorer = EnsembleScorer::new(Box::new(Fixed(0.6)), Box::new(Fixed(0.4)));
        let f = MlFeatures::from_assessment(&assessment(PillarScores::default(), vec![]));
        let outcome = scorer.score(&f);
        assert_eq!(outcome.ml_score, 50);
        assert_eq!(outcome.confidence, ConfidenceTier::Medium);

        let scorer = EnsembleScorer::new(Box::new(Fixed(1.0)), Box::new(Fixed(0.8)));
        assert_eq!(scorer.score(&f).ml_score, 90);
        assert_eq!(scorer.score(&f).confidence, ConfidenceTier::High);
    }
}
