//! HTTP-level tests for the OpenRouter client against a mock server.

use receipt_audit::config::Settings;
use receipt_audit::models::VendorContext;
use receipt_audit::services::completion::CompletionProvider;
use receipt_audit::services::openrouter::OpenRouterClient;
use receipt_audit::services::vision::VisionProvider;
use receipt_audit::AuditError;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, api_key: Option<&str>) -> OpenRouterClient {
    let settings = Settings {
        openrouter_base_url: server.uri(),
        openrouter_api_key: api_key.map(str::to_string),
        provider_timeout_secs: 5,
        ..Default::default()
    };
    OpenRouterClient::from_settings(&settings).unwrap()
}

fn reply(content: &str) -> serde_json::Value {
    json!({
        "id": "gen-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn vision_extraction_parses_fenced_json() {
    let server = MockServer::start().await;
    let content = "```json\n{\"invoiceNumber\": \"INV-42\", \"gstNumber\": \"29ABCDE1234F1Z5\", \"subtotal\": \"1,000\", \"cgst\": 90, \"sgst\": 90, \"grandTotal\": 1180, \"qrValid\": true}\n```";

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("data:image/png;base64,"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(content)))
        .expect(1)
        .mount(&server)
        .await;

    let extraction = client(&server, Some("test-key"))
        .extract(b"fake-png", "image/png", &VendorContext::default())
        .await
        .unwrap();

    assert_eq!(extraction.fields.invoice_number.as_deref(), Some("INV-42"));
    assert_eq!(extraction.fields.vendor_gst.as_deref(), Some("29ABCDE1234F1Z5"));
    assert_eq!(extraction.fields.subtotal, 1000.0);
    assert_eq!(extraction.fields.grand_total, 1180.0);
    assert_eq!(extraction.fields.qr_valid, Some(true));
}

#[tokio::test]
async fn invalid_vision_json_is_repaired_once() {
    let server = MockServer::start().await;

    // The repair request is the only one carrying the fix instruction.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Fix this output"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("{\"invoiceNumber\": \"INV-9\", \"amount\": 500}")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("I could not read the receipt clearly.")))
        .expect(1)
        .mount(&server)
        .await;

    let extraction = client(&server, Some("test-key"))
        .extract(b"img", "image/jpeg", &VendorContext::default())
        .await
        .unwrap();
    assert_eq!(extraction.fields.invoice_number.as_deref(), Some("INV-9"));
    assert_eq!(extraction.fields.amount, 500.0);
}

#[tokio::test]
async fn second_invalid_reply_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("[1, 2, 3]")))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server, Some("test-key"))
        .extract(b"img", "image/png", &VendorContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::Provider(_)));
}

#[tokio::test]
async fn http_errors_surface_as_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client(&server, Some("test-key"))
        .complete("system", "hello")
        .await
        .unwrap_err();
    match err {
        AuditError::Provider(msg) => assert!(msg.contains("429"), "unexpected message: {}", msg),
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_key_short_circuits_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server, None).complete("system", "hello").await.unwrap_err();
    assert!(matches!(err, AuditError::MissingApiKey));
}

#[tokio::test]
async fn completion_returns_trimmed_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"role\":\"system\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("  {\"decision\": \"SAFE\"}\n")))
        .mount(&server)
        .await;

    let text = client(&server, Some("k")).complete("ledger facts", "is it safe?").await.unwrap();
    assert_eq!(text, "{\"decision\": \"SAFE\"}");
}
