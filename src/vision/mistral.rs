//! Mistral chat completions client (pixtral vision models).

use std::time::Duration;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::VisionBackend;
use crate::config::MistralConfig;
use crate::error::ExtractionError;

/// Mistral client for single-shot extraction requests.
#[derive(Clone)]
pub struct MistralClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    timeout: Duration,
}

impl MistralClient {
    pub fn new(config: &MistralConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }

    fn map_transport(&self, err: reqwest::Error) -> ExtractionError {
        if err.is_timeout() {
            ExtractionError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            ExtractionError::Transport(err)
        }
    }
}

#[async_trait::async_trait]
impl VisionBackend for MistralClient {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn complete(&self, prompt: &str, images: &[&[u8]]) -> Result<String, ExtractionError> {
        let request = build_request(&self.model, prompt, images);

        info!(
            "MistralClient: calling {} (model={}, {} images)",
            self.api_url,
            self.model,
            images.len()
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;

        if status != StatusCode::OK {
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        debug!(
            "MistralClient: raw response ({} bytes): {}",
            body.len(),
            truncate(&body, 500)
        );

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|_| ExtractionError::UnexpectedBody(truncate(&body, 200)))?;

        if let Some(usage) = &parsed.usage {
            info!(
                "Mistral response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ExtractionError::UnexpectedBody("response has no message content".to_string())
            })
    }
}

fn build_request(model: &str, prompt: &str, images: &[&[u8]]) -> ChatCompletionRequest {
    let mut content = vec![ContentPart::Text {
        text: prompt.to_string(),
    }];
    for image in images {
        content.push(ContentPart::ImageUrl {
            image_url: format!("data:image/jpeg;base64,{}", BASE64.encode(image)),
        });
    }

    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: Role::User,
            content,
        }],
        response_format: ResponseFormat {
            kind: "json_object",
        },
        temperature: 0.0,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: Role,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
}

/// Mistral takes `image_url` as a plain data-URI string, not an object.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: String },
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
