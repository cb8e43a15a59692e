use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};

use super::{json_column, optional_json_column, parsed_column};
use crate::models::{Decision, Receipt};

const RECEIPT_COLUMNS: &str = "receipt_id, project_id, vendor_id, image_path, image_hash, uploaded_at,
    extracted_json, scores_json, heuristic_score, ml_score, final_risk_score, ai_decision,
    manual_decision, fraud_signals_json, confidence, visual_forensics_json, model_metadata_json";

fn row_to_receipt(row: &Row<'_>) -> SqlResult<Receipt> {
    let manual: Option<String> = row.get(12)?;
    let manual_decision = match manual {
        Some(raw) => Some(raw.parse::<Decision>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(Receipt {
        receipt_id: row.get(0)?,
        project_id: row.get(1)?,
        vendor_id: row.get(2)?,
        image_path: row.get(3)?,
        image_hash: row.get(4)?,
        uploaded_at: row.get(5)?,
        extracted_data: json_column(row, 6)?,
        scores: json_column(row, 7)?,
        heuristic_score: row.get(8)?,
        ml_score: row.get(9)?,
        final_risk_score: row.get(10)?,
        ai_decision: parsed_column(row, 11)?,
        manual_decision,
        fraud_signals: json_column(row, 13)?,
        confidence: parsed_column(row, 14)?,
        visual_forensics: optional_json_column(row, 15)?,
        model_metadata: optional_json_column(row, 16)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> SqlResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn to_optional_json<T: serde::Serialize>(value: &Option<T>) -> SqlResult<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

pub fn insert_receipt(conn: &Connection, receipt: &Receipt) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO receipts (
            receipt_id, project_id, vendor_id, image_path, image_hash, uploaded_at, invoice_number,
            extracted_json, scores_json, heuristic_score, ml_score, final_risk_score, ai_decision,
            manual_decision, fraud_signals_json, confidence, visual_forensics_json, model_metadata_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            receipt.receipt_id,
            receipt.project_id,
            receipt.vendor_id,
            receipt.image_path,
            receipt.image_hash,
            receipt.uploaded_at,
            receipt.extracted_data.invoice_number,
            to_json(&receipt.extracted_data)?,
            to_json(&receipt.scores)?,
            receipt.heuristic_score,
            receipt.ml_score,
            receipt.final_risk_score,
            receipt.ai_decision.as_str(),
            receipt.manual_decision.map(Decision::as_str),
            to_json(&receipt.fraud_signals)?,
            receipt.confidence.as_str(),
            to_optional_json(&receipt.visual_forensics)?,
            to_optional_json(&receipt.model_metadata)?,
        ],
    )?;
    Ok(())
}

pub fn invoice_exists(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    invoice_number: &str,
) -> SqlResult<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM receipts
            WHERE project_id = ?1 AND vendor_id = ?2 AND invoice_number = ?3
        )",
        params![project_id, vendor_id, invoice_number],
        |row| row.get(0),
    )
}

/// Earliest receipt in the ledger carrying this image fingerprint.
pub fn find_by_image_hash(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    image_hash: &str,
) -> SqlResult<Option<String>> {
    conn.query_row(
        "SELECT receipt_id FROM receipts
         WHERE project_id = ?1 AND vendor_id = ?2 AND image_hash = ?3
         ORDER BY seq ASC LIMIT 1",
        params![project_id, vendor_id, image_hash],
        |row| row.get(0),
    )
    .optional()
}

pub fn get_receipt(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    receipt_id: &str,
) -> SqlResult<Option<Receipt>> {
    let sql = format!(
        "SELECT {} FROM receipts WHERE project_id = ?1 AND vendor_id = ?2 AND receipt_id = ?3",
        RECEIPT_COLUMNS
    );
    conn.query_row(&sql, params![project_id, vendor_id, receipt_id], row_to_receipt)
        .optional()
}

pub fn set_manual_decision(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    receipt_id: &str,
    decision: Decision,
) -> SqlResult<usize> {
    conn.execute(
        "UPDATE receipts SET manual_decision = ?4
         WHERE project_id = ?1 AND vendor_id = ?2 AND receipt_id = ?3",
        params![project_id, vendor_id, receipt_id, decision.as_str()],
    )
}

/// Whole ledger in insertion order.
pub fn list_receipts(conn: &Connection, project_id: &str, vendor_id: &str) -> SqlResult<Vec<Receipt>> {
    let sql = format!(
        "SELECT {} FROM receipts WHERE project_id = ?1 AND vendor_id = ?2 ORDER BY seq ASC",
        RECEIPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![project_id, vendor_id], row_to_receipt)?;
    rows.collect()
}

pub fn count_receipts(conn: &Connection, project_id: &str, vendor_id: &str) -> SqlResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM receipts WHERE project_id = ?1 AND vendor_id = ?2",
        params![project_id, vendor_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> SqlResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_setting(conn: &Connection, key: &str) -> SqlResult<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
    stmt.query_row(params![key], |row| row.get(0)).optional()
}

pub struct ProcessingLog<'a> {
    pub receipt_id: Option<&'a str>,
    pub project_id: &'a str,
    pub vendor_id: &'a str,
    pub process_type: &'a str,
    pub status: &'a str,
    pub message: Option<&'a str>,
}

pub fn log_processing(conn: &Connection, entry: &ProcessingLog<'_>) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO processing_logs (id, receipt_id, project_id, vendor_id, process_type, status, message, created_at)
         VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        params![
            entry.receipt_id,
            entry.project_id,
            entry.vendor_id,
            entry.process_type,
            entry.status,
            entry.message
        ],
    )?;
    Ok(())
}

pub fn count_processing_logs(
    conn: &Connection,
    project_id: &str,
    vendor_id: &str,
    process_type: &str,
) -> SqlResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM processing_logs
         WHERE project_id = ?1 AND vendor_id = ?2 AND process_type = ?3",
        params![project_id, vendor_id, process_type],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
