use super::VisionModel;
use crate::http::build_client_with_timeout;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model: std::env::var("OPENAI_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "gpt-5".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// Client for the OpenAI Responses API.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client_with_timeout("OPENAI_TIMEOUT_SECS", 120),
            config,
        }
    }

    pub async fn respond(
        &self,
        model: &str,
        prompt: &str,
        image_urls: &[String],
    ) -> Result<LlmResponse, LlmError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        let mut content = vec![InputContent::Text {
            text: prompt.to_string(),
        }];
        content.extend(image_urls.iter().map(|url| InputContent::Image {
            image_url: url.clone(),
        }));
        let body = ResponsesRequest {
            model: model.to_string(),
            input: vec![InputMessage {
                role: "user",
                content,
            }],
        };

        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: ResponsesPayload = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .text()
            .ok_or_else(|| LlmError::InvalidResponse("missing output text".into()))?;
        debug!(target = "scout.llm", model, images = image_urls.len(), chars = text.len(), "llm_response");

        Ok(LlmResponse {
            text,
            usage: payload.usage,
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiClient {
    async fn describe(
        &self,
        model: &str,
        prompt: &str,
        image_urls: &[String],
    ) -> Result<LlmResponse, LlmError> {
        self.respond(model, prompt, image_urls).await
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputMessage>,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: &'static str,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum InputContent {
    #[serde(rename = "input_text")]
    Text { text: String },
    #[serde(rename = "input_image")]
    Image { image_url: String },
}

#[derive(Debug, Deserialize)]
struct ResponsesPayload {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

impl ResponsesPayload {
    fn text(&self) -> Option<String> {
        let joined: Vec<&str> = self
            .output
            .iter()
            .filter(|item| item.r#type == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.r#type == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect();
        if !joined.is_empty() {
            return Some(joined.join("\n"));
        }
        self.output_text.clone().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    r#type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};

    async fn spawn_responses() -> String {
        let app = Router::new().route(
            "/responses",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer sk-test");
                if !authorized {
                    return (axum::http::StatusCode::UNAUTHORIZED, Json(json!({})));
                }
                let parts = body["input"][0]["content"].as_array().map(Vec::len).unwrap_or(0);
                (
                    axum::http::StatusCode::OK,
                    Json(json!({
                        "output": [
                            {"type": "reasoning", "content": []},
                            {"type": "message", "content": [
                                {"type": "output_text", "text": format!("{} parts for {}", parts, body["model"].as_str().unwrap_or(""))}
                            ]}
                        ],
                        "usage": {"input_tokens": 10, "output_tokens": 5}
                    })),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(base: String, key: Option<&str>) -> OpenAiClient {
        OpenAiClient::new(LlmConfig {
            base_url: base,
            api_key: key.map(str::to_string),
            model: "gpt-5".into(),
        })
    }

    #[test]
    fn request_serializes_typed_content() {
        let body = ResponsesRequest {
            model: "gpt-5".into(),
            input: vec![InputMessage {
                role: "user",
                content: vec![
                    InputContent::Text { text: "hi".into() },
                    InputContent::Image {
                        image_url: "https://cdn/x.png".into(),
                    },
                ],
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(value["input"][0]["content"][1]["type"], "input_image");
        assert_eq!(value["input"][0]["content"][1]["image_url"], "https://cdn/x.png");
    }

    #[test]
    fn falls_back_to_top_level_output_text() {
        let payload: ResponsesPayload =
            serde_json::from_value(json!({"output_text": "plain"})).unwrap();
        assert_eq!(payload.text().as_deref(), Some("plain"));
        let empty: ResponsesPayload = serde_json::from_value(json!({"output": []})).unwrap();
        assert!(empty.text().is_none());
    }

    #[tokio::test]
    async fn describes_images_through_responses_api() {
        let base = spawn_responses().await;
        let llm = client(base, Some("sk-test"));
        let out = llm
            .describe("gpt-4", "describe", &["https://cdn/a.png".into(), "https://cdn/b.png".into()])
            .await
            .unwrap();
        assert_eq!(out.text, "3 parts for gpt-4");
        assert_eq!(out.usage.and_then(|u| u.output_tokens), Some(5));
    }

    #[tokio::test]
    async fn missing_key_and_http_errors() {
        let base = spawn_responses().await;
        let err = client(base.clone(), None)
            .describe("gpt-5", "p", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
        let err = client(base, Some("wrong"))
            .describe("gpt-5", "p", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http(_)));
    }
}
