//! Groq vision API client.
//!
//! Sends the photo as a base64 data URL alongside a fixed prompt that demands
//! a raw-JSON verdict. A reply that is not valid verdict JSON is a
//! `MalformedResponse`; this client never invents a judgment and never
//! retries on its own.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::VisionError;
use super::{check_inputs, Judgment, JudgmentSource, VerificationClient};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default vision-capable model.
pub const DEFAULT_GROQ_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Groq chat-completions client for photo verification.
pub struct GroqVisionClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GroqVisionClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            model,
        }
    }

    fn build_prompt(instructions: &str) -> String {
        format!(
            "Analyze this image for compliance with the following verification \
             instructions: \"{instructions}\"\n\n\
             Respond with exactly this JSON shape and nothing else (no markdown, \
             no code fences):\n\
             {{\"success\": true/false, \"reasoning\": \"what you see and why it \
             passes or fails\", \"confidence\": 0.0-1.0}}\n\n\
             Judge only whether the image meets the instructions. Confidence must \
             be low when the image does not match and high when it clearly does."
        )
    }

    /// Parse the model's reply into a verdict.
    ///
    /// Tolerates code fences around the JSON; anything else is malformed.
    fn parse_verdict(content: &str) -> Result<VerdictPayload, VisionError> {
        let trimmed = content.trim();
        let stripped = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed);

        serde_json::from_str(stripped).map_err(|e| {
            VisionError::MalformedResponse(format!(
                "verdict is not valid JSON: {}, reply was: {}",
                e,
                &stripped[..stripped.len().min(200)]
            ))
        })
    }
}

#[async_trait]
impl VerificationClient for GroqVisionClient {
    async fn verify(&self, image: &[u8], instructions: &str) -> Result<Judgment, VisionError> {
        let format = check_inputs(image, instructions)?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let data_url = format!("data:{};base64,{}", format.mime_type(), encoded);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: Self::build_prompt(instructions),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            temperature: 0.2,
            max_tokens: 1024,
        };

        tracing::debug!(model = %self.model, "sending verification request to Groq");

        let response = match self
            .client
            .post(GROQ_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(VisionError::Network(format!("request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(VisionError::Network(format!("connection failed: {}", e)));
                }
                return Err(VisionError::Network(format!("request failed: {}", e)));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(VisionError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            VisionError::MalformedResponse(format!(
                "failed to parse response envelope: {}, body: {}",
                e,
                &body[..body.len().min(500)]
            ))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::MalformedResponse("no choices in response".into()))?;

        let verdict = Self::parse_verdict(&content)?;

        Ok(Judgment {
            success: verdict.success,
            reasoning: verdict.reasoning,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            source: JudgmentSource::Model,
        })
    }
}

/// Chat completions request (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

/// Content part for multimodal messages (text or image).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// Chat completions response envelope.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// The verdict shape the prompt demands.
#[derive(Debug, Deserialize)]
struct VerdictPayload {
    success: bool,
    reasoning: String,
    confidence: f64,
}
