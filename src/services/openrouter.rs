use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{AuditError, Result};
use crate::models::VendorContext;
use crate::services::completion::{extract_json_block, CompletionProvider};
use crate::services::vision::{
    fields_from_value, validate_extraction, VisionExtraction, VisionProvider, EXTRACTION_PROMPT,
};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Message {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Message {
            role,
            content: MessageContent::Text(content.into()),
        }
    }
}

/// OpenAI-compatible chat-completions client for OpenRouter. Serves both the
/// vision extraction and the chat completion paths.
#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    vision_model: String,
    chat_model: String,
}

impl OpenRouterClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .build()?;
        Ok(OpenRouterClient {
            http,
            base_url: settings.openrouter_base_url.trim_end_matches('/').to_string(),
            api_key: settings.openrouter_api_key.clone(),
            vision_model: settings.vision_model.clone(),
            chat_model: settings.chat_model.clone(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, model: &str, messages: Vec<Message>) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or(AuditError::MissingApiKey)?;
        let request = ChatRequest {
            model,
            temperature: 0.1,
            messages,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuditError::Provider(format!("OpenRouter error {}: {}", status, body)));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AuditError::Provider("Empty response".to_string()))?;
        debug!(model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[async_trait]
impl VisionProvider for OpenRouterClient {
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
        _vendor: &VendorContext,
    ) -> Result<VisionExtraction> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            general_purpose::STANDARD.encode(image)
        );
        let messages = vec![Message {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: EXTRACTION_PROMPT.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }];

        let raw = self.call(&self.vision_model, messages).await?;
        let mut value = extract_json_block(&raw);

        if !value.as_ref().is_some_and(validate_extraction) {
            warn!("vision reply failed schema validation, requesting repair");
            let fix_prompt = format!(
                "Fix this output so it is a single JSON object matching the requested keys exactly. Output JSON only.\n{}",
                raw
            );
            let repaired = self
                .call(
                    &self.vision_model,
                    vec![
                        Message::text("system", EXTRACTION_PROMPT),
                        Message::text("user", fix_prompt),
                    ],
                )
                .await?;
            value = extract_json_block(&repaired);
        }

        match value {
            Some(value) if validate_extraction(&value) => {
                Ok(VisionExtraction::new(fields_from_value(value)?))
            }
            _ => Err(AuditError::Provider("Vision JSON validation failed".to_string())),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterClient {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        self.call(
            &self.chat_model,
            vec![
                Message::text("system", system_prompt),
                Message::text("user", user_message),
            ],
        )
        .await
    }
}
