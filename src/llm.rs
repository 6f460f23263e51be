use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAiSettings;
use crate::error::ApiError;
use crate::http;

const SERVICE: &str = "openai";

/// One system instruction plus user content, answered by a single completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the service to constrain the answer to a JSON object.
    pub json: bool,
}

/// Text-generation service seam. The pipeline only depends on this shape.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ApiError>;
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: Client, api_key: String, settings: &OpenAiSettings) -> Self {
        Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        }
    }

    /// Same client and credential, different model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ApiError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json.then_some(ResponseFormat { kind: "json_object" }),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.user,
                },
            ],
        };

        let endpoint = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {}, temperature {})", endpoint, self.model, request.temperature);
        let resp = http::send_checked(
            SERVICE,
            self.client
                .post(&endpoint)
                .bearer_auth(self.api_key.trim())
                .json(&body),
        )
        .await?;

        let parsed: ChatResponse = http::read_json(SERVICE, resp).await?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ApiError::malformed(SERVICE, "response has no message content"))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_model_keeps_endpoint() {
        let settings = OpenAiSettings {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..OpenAiSettings::default()
        };
        let chat = OpenAiChat::new(Client::new(), "sk-test".into(), &settings);
        assert_eq!(chat.model(), "gpt-4o-mini");
        let refiner = chat.clone().with_model("gpt-4");
        assert_eq!(refiner.model(), "gpt-4");
        assert_eq!(refiner.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn request_body_omits_unset_fields() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.0,
            max_tokens: None,
            response_format: None,
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn json_mode_sets_response_format() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.0,
            max_tokens: Some(450),
            response_format: Some(ResponseFormat { kind: "json_object" }),
            messages: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 450);
    }

    #[test]
    fn response_with_null_content_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
