//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use portfolio_shared::{LlmConfig, PortfolioError, Result};

use crate::synthesis::LanguageModel;

/// Client-side ceiling; the synthesize stage timeout is normally shorter.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// [`LanguageModel`] backed by a `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(api_key: impl Into<String>, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("PortfolioBuilder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PortfolioError::config(format!("failed to build model client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| PortfolioError::config("API key contains invalid header characters"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str, schema_hint: &str) -> Result<String> {
        let system = format!(
            "You produce a single JSON object matching this schema and nothing else: {schema_hint}"
        );
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortfolioError::model_unavailable(format!("model request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PortfolioError::model_unavailable(format!(
                "model endpoint returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            PortfolioError::model_unavailable(format!("malformed completion envelope: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PortfolioError::model_unavailable("completion has no choices"))?
            .message
            .content
            .unwrap_or_default();

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
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
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_shared::{ErrorKind, SynthesisErrorKind};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "test/model".to_string(),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn sends_chat_request_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test/model",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let model =
            OpenAiCompatibleModel::new("sk-test", &config(&format!("{}/v1/", server.uri()))).unwrap();
        let reply = model.complete("describe acme", "{}").await.unwrap();
        assert_eq!(reply, "{\"ok\":true}");
        assert_eq!(model.model(), "test/model");
    }

    #[tokio::test]
    async fn error_status_is_model_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new("sk-test", &config(&server.uri())).unwrap();
        let err = model.complete("prompt", "{}").await.unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Synthesis(SynthesisErrorKind::ModelUnavailable)
        );
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn empty_choices_is_model_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new("sk-test", &config(&server.uri())).unwrap();
        let err = model.complete("prompt", "{}").await.unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Synthesis(SynthesisErrorKind::ModelUnavailable)
        );
    }

    #[tokio::test]
    async fn null_content_is_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let model = OpenAiCompatibleModel::new("sk-test", &config(&server.uri())).unwrap();
        assert_eq!(model.complete("prompt", "{}").await.unwrap(), "");
    }
}
