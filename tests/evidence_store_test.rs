use receipt_audit::models::{
    ConfidenceTier, Decision, EnsembleOutcome, ExtractedFields, FraudSignal, LedgerStatus,
    ModelMetadata, NewReceipt, PillarScores, Severity, SignalType,
};
use receipt_audit::AuditError;
use receipt_audit::services::conversation::ConversationStore;
use receipt_audit::services::evidence::EvidenceStore;
use tempfile::TempDir;

fn store() -> (TempDir, EvidenceStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = EvidenceStore::open(&dir.path().join("evidence.sqlite")).unwrap();
    (dir, store)
}

fn new_receipt(invoice: Option<&str>, amount: f64, score: u32, decision: Decision) -> NewReceipt {
    NewReceipt {
        image_path: "/receipts/r.png".to_string(),
        extracted: ExtractedFields {
            invoice_number: invoice.map(str::to_string),
            amount,
            ..Default::default()
        },
        heuristic_score: score,
        final_risk_score: score,
        ai_decision: decision,
        fraud_signals: vec![FraudSignal::new(
            SignalType::TaxMismatch,
            Severity::Medium,
            "CGST is not 9% of subtotal",
        )],
        ..Default::default()
    }
}

#[test]
fn duplicate_invoice_gets_flag_signal_and_bump() {
    let (_dir, store) = store();
    let first = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 100.0, 40, Decision::Review))
        .unwrap();
    let second = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 100.0, 40, Decision::Review))
        .unwrap();

    assert!(!first.extracted_data.duplicate_invoice);
    assert!(second.extracted_data.duplicate_invoice);
    assert_eq!(second.final_risk_score, first.final_risk_score + 25);
    assert_eq!(second.heuristic_score, first.heuristic_score + 25);

    let last = second.fraud_signals.last().unwrap();
    assert_eq!(last.signal_type, SignalType::DuplicateInvoice);
    assert_eq!(last.severity, Severity::High);
    assert_eq!(last.description, "Duplicate invoice number detected: INV-1");
    // Earlier signals keep their order.
    assert_eq!(second.fraud_signals[0].signal_type, SignalType::TaxMismatch);
    // The decision assigned at creation is not re-derived from the bumped score.
    assert_eq!(second.ai_decision, Decision::Review);
}

#[test]
fn duplicate_bump_caps_at_hundred() {
    let (_dir, store) = store();
    store
        .add_receipt("p1", "v1", new_receipt(Some("INV-9"), 0.0, 90, Decision::Fraud))
        .unwrap();
    let dup = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-9"), 0.0, 90, Decision::Fraud))
        .unwrap();
    assert_eq!(dup.final_risk_score, 100);
    assert_eq!(dup.heuristic_score, 100);
}

#[test]
fn duplicate_detection_is_scoped_to_the_ledger_and_ignores_missing_numbers() {
    let (_dir, store) = store();
    store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 0.0, 10, Decision::Safe))
        .unwrap();

    let other_vendor = store
        .add_receipt("p1", "v2", new_receipt(Some("INV-1"), 0.0, 10, Decision::Safe))
        .unwrap();
    let other_project = store
        .add_receipt("p2", "v1", new_receipt(Some("INV-1"), 0.0, 10, Decision::Safe))
        .unwrap();
    assert!(!other_vendor.extracted_data.duplicate_invoice);
    assert!(!other_project.extracted_data.duplicate_invoice);

    let a = store.add_receipt("p1", "v1", new_receipt(None, 0.0, 10, Decision::Safe)).unwrap();
    let b = store.add_receipt("p1", "v1", new_receipt(None, 0.0, 10, Decision::Safe)).unwrap();
    assert!(!a.extracted_data.duplicate_invoice);
    assert!(!b.extracted_data.duplicate_invoice);
}

#[test]
fn override_is_idempotent_and_unknown_ids_are_none() {
    let (_dir, store) = store();
    let receipt = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 10.0, 90, Decision::Fraud))
        .unwrap();

    let once = store
        .update_receipt_decision("p1", "v1", &receipt.receipt_id, Decision::Safe)
        .unwrap()
        .unwrap();
    let twice = store
        .update_receipt_decision("p1", "v1", &receipt.receipt_id, Decision::Safe)
        .unwrap()
        .unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.manual_decision, Some(Decision::Safe));
    assert_eq!(twice.ai_decision, Decision::Fraud);
    assert_eq!(twice.uploaded_at, receipt.uploaded_at);

    assert!(store
        .update_receipt_decision("p1", "v1", "REC-missing", Decision::Safe)
        .unwrap()
        .is_none());
    // Same id, wrong ledger.
    assert!(store
        .update_receipt_decision("p1", "other", &receipt.receipt_id, Decision::Safe)
        .unwrap()
        .is_none());
}

#[test]
fn manual_safe_moves_receipt_out_of_fraud_count() {
    let (_dir, store) = store();
    let receipt = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 2500.0, 90, Decision::Fraud))
        .unwrap();

    let before = store.get_computed_totals("p1", "v1").unwrap();
    assert_eq!(before.fraud_count, 1);
    assert_eq!(before.status, LedgerStatus::UnderReview);

    store
        .update_receipt_decision("p1", "v1", &receipt.receipt_id, Decision::Safe)
        .unwrap();
    let after = store.get_computed_totals("p1", "v1").unwrap();
    assert_eq!(after.fraud_count, 0);
    assert_eq!(after.safe_count, 1);
    assert_eq!(after.verified_amount, 2500.0);
    assert_eq!(after.fraud_amount, 0.0);
    assert_eq!(after.status, LedgerStatus::Active);
    // Risk is still the stored score.
    assert_eq!(after.average_risk_score, 90);
}

#[test]
fn empty_ledger_reads_as_pending() {
    let (_dir, store) = store();
    let totals = store.get_computed_totals("nobody", "nothing").unwrap();
    assert_eq!(totals.total_receipts, 0);
    assert_eq!(totals.project_risk_index, 0);
    assert_eq!(totals.status, LedgerStatus::Pending);
    assert!(store.get_receipts("nobody", "nothing").unwrap().is_empty());
}

#[test]
fn ledger_survives_reopen_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.sqlite");
    let ids: Vec<String> = {
        let store = EvidenceStore::open(&path).unwrap();
        (0..5)
            .map(|i| {
                store
                    .add_receipt("p1", "v1", new_receipt(Some(format!("INV-{}", i).as_str()), 1.0, i, Decision::Safe))
                    .unwrap()
                    .receipt_id
            })
            .collect()
    };

    let reopened = EvidenceStore::open(&path).unwrap();
    let receipts = reopened.get_receipts("p1", "v1").unwrap();
    let stored: Vec<String> = receipts.iter().map(|r| r.receipt_id.clone()).collect();
    assert_eq!(stored, ids);
    assert_eq!(receipts[3].fraud_signals.len(), 1);
}

#[test]
fn concurrent_inserts_of_one_invoice_leave_exactly_one_original() {
    let (_dir, store) = store();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let store = store.clone();
            scope.spawn(move || {
                store
                    .add_receipt("p1", "v1", new_receipt(Some("INV-RACE"), 10.0, 30, Decision::Review))
                    .unwrap();
            });
        }
    });

    let receipts = store.get_receipts("p1", "v1").unwrap();
    assert_eq!(receipts.len(), 8);
    let originals = receipts
        .iter()
        .filter(|r| !r.extracted_data.duplicate_invoice)
        .count();
    assert_eq!(originals, 1);
    assert!(!receipts[0].extracted_data.duplicate_invoice);
    assert!(receipts[1..].iter().all(|r| r.final_risk_score == 55));
}

#[test]
fn stored_receipts_reject_edits_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.sqlite");
    let store = EvidenceStore::open(&path).unwrap();
    store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 1.0, 10, Decision::Safe))
        .unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    assert!(conn.execute("UPDATE receipts SET ai_decision = 'FRAUD'", []).is_err());
    assert!(conn.execute("DELETE FROM receipts", []).is_err());
}

#[test]
fn vendor_memory_includes_newest_fifty_chat_entries() {
    use receipt_audit::models::{ChatRole, ConversationEntry};

    let dir = tempfile::tempdir().unwrap();
    let evidence = EvidenceStore::open(&dir.path().join("evidence.sqlite")).unwrap();
    let chat = ConversationStore::open(&dir.path().join("chat.sqlite"), 100).unwrap();

    evidence
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 10.0, 10, Decision::Safe))
        .unwrap();
    for i in 0..70 {
        chat.save_chat_message(
            "p1",
            "v1",
            &ConversationEntry {
                role: ChatRole::User,
                content: format!("q{}", i),
                timestamp: "2025-01-01T00:00:00Z".to_string(),
                tool_name: None,
                receipt_id: None,
            },
        )
        .unwrap();
    }

    let memory = evidence.get_vendor_memory("p1", "v1", &chat).unwrap();
    assert_eq!(memory.receipts.len(), 1);
    assert_eq!(memory.totals.total_receipts, 1);
    assert_eq!(memory.conversation_history.len(), 50);
    assert_eq!(memory.conversation_history[0].content, "q20");
    assert_eq!(memory.conversation_history[49].content, "q69");
}

#[test]
fn non_finite_scores_are_stored_as_readable_numbers() {
    let (_dir, store) = store();
    let mut receipt = new_receipt(Some("INV-NAN"), f64::NAN, 10, Decision::Review);
    receipt.scores = PillarScores {
        financial: f64::NAN,
        structural: f64::INFINITY,
        visual: -5.0,
        behavioral: 250.0,
    };
    receipt.model_metadata = Some(ModelMetadata {
        source: "FraudEngineV3".to_string(),
        architecture: "4-Pillar-Defensive".to_string(),
        version: "3.0".to_string(),
        ensemble: Some(EnsembleOutcome {
            ml_score: 3,
            confidence: ConfidenceTier::High,
            logistic_prob: f64::NAN,
            vote_prob: f64::NEG_INFINITY,
        }),
    });

    let added = store.add_receipt("p1", "v1", receipt).unwrap();
    let expected = PillarScores {
        financial: 0.0,
        structural: 0.0,
        visual: 0.0,
        behavioral: 100.0,
    };
    assert_eq!(added.scores, expected);

    // The ledger still loads after the insert.
    let receipts = store.get_receipts("p1", "v1").unwrap();
    assert_eq!(receipts[0].scores, expected);
    assert_eq!(receipts[0].extracted_data.amount_raw, 0.0);
    let ensemble = receipts[0].model_metadata.clone().unwrap().ensemble.unwrap();
    assert_eq!(ensemble.logistic_prob, 0.0);
    assert_eq!(ensemble.vote_prob, 0.0);

    let totals = store.get_computed_totals("p1", "v1").unwrap();
    assert_eq!(totals.total_receipts, 1);
    assert_eq!(totals.total_claimed_amount, 0.0);
    assert!(store.build_ai_context("p1", "v1").is_ok());
}

/// Installs a trigger through a second connection so matching writes abort.
fn reject_writes(path: &std::path::Path, trigger: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(trigger).unwrap();
}

#[test]
fn failed_insert_is_an_error_and_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.sqlite");
    let store = EvidenceStore::open(&path).unwrap();
    reject_writes(
        &path,
        "CREATE TRIGGER reject_insert BEFORE INSERT ON receipts
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    );

    let err = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 10.0, 10, Decision::Safe))
        .unwrap_err();
    assert!(matches!(err, AuditError::Database(_)), "unexpected error: {:?}", err);
    assert!(store.get_receipts("p1", "v1").unwrap().is_empty());
    assert_eq!(store.get_computed_totals("p1", "v1").unwrap().status, LedgerStatus::Pending);
}

#[test]
fn failed_override_is_an_error_not_a_missing_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.sqlite");
    let store = EvidenceStore::open(&path).unwrap();
    let receipt = store
        .add_receipt("p1", "v1", new_receipt(Some("INV-1"), 10.0, 90, Decision::Fraud))
        .unwrap();
    reject_writes(
        &path,
        "CREATE TRIGGER reject_override BEFORE UPDATE OF manual_decision ON receipts
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    );

    let err = store
        .update_receipt_decision("p1", "v1", &receipt.receipt_id, Decision::Safe)
        .unwrap_err();
    assert!(matches!(err, AuditError::Database(_)), "unexpected error: {:?}", err);
    let stored = store.get_receipt("p1", "v1", &receipt.receipt_id).unwrap().unwrap();
    assert_eq!(stored.manual_decision, None);
}
