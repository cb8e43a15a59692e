use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::Result;
use crate::models::{ConfidenceTier, ExtractedFields, FraudSignal, VendorContext};

pub const EXTRACTION_PROMPT: &str = r#"You are a strict OCR extraction system for Indian GST invoices.
Return JSON only, no prose, with these keys:
- invoiceNumber (string|null)
- date (string|null)
- amount (number|null)
- vendorName (string|null)
- gstNumber (string|null, 15-character GSTIN exactly as printed)
- subtotal (number|null)
- cgst (number|null)
- sgst (number|null)
- grandTotal (number|null)
- lineItemsSum (number|null, sum of all line item amounts)
- qrValid (boolean|null, whether a printed QR code is present and readable)
- signatureConfidence ("High"|"Medium"|"Low"|null)
"#;

/// Field extraction for one receipt image.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        vendor: &VendorContext,
    ) -> Result<VisionExtraction>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionExtraction {
    pub fields: ExtractedFields,
    pub confidence: ConfidenceTier,
    /// Signals raised by the provider itself, merged ahead of the pillar signals.
    pub signals: Vec<FraudSignal>,
}

impl VisionExtraction {
    pub fn new(fields: ExtractedFields) -> Self {
        VisionExtraction {
            fields,
            confidence: ConfidenceTier::High,
            signals: Vec::new(),
        }
    }

    /// Stand-in used when the provider is missing, fails, or times out.
    pub fn unreadable() -> Self {
        VisionExtraction {
            fields: ExtractedFields::unreadable(),
            confidence: ConfidenceTier::Low,
            signals: Vec::new(),
        }
    }
}

fn extraction_schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let amount = json!({"type": ["number", "string", "null"]});
        let text = json!({"type": ["string", "number", "null"]});
        let schema = json!({
            "type": "object",
            "properties": {
                "invoiceNumber": text,
                "date": {"type": ["string", "null"]},
                "amount": amount,
                "vendorName": {"type": ["string", "null"]},
                "gstNumber": {"type": ["string", "null"]},
                "subtotal": amount,
                "cgst": amount,
                "sgst": amount,
                "grandTotal": amount,
                "lineItemsSum": amount,
                "qrValid": {"type": ["boolean", "string", "null"]},
                "signatureConfidence": {"type": ["string", "null"]}
            }
        });
        JSONSchema::compile(&schema).expect("static extraction schema")
    })
}

pub fn validate_extraction(value: &Value) -> bool {
    extraction_schema().is_valid(value)
}

/// Coerces a validated provider object into typed fields.
pub fn fields_from_value(value: Value) -> Result<ExtractedFields> {
    Ok(serde_json::from_value(value)?)
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ["png", "jpg", "jpeg", "webp"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
