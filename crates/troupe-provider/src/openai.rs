use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{credential_fingerprint, ChatMessage, ChatRequest, ChatResponse, LlmProvider};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError | Self::Timeout)
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn to_api_request(request: ChatRequest) -> ApiRequest {
        ApiRequest {
            model: request.model,
            temperature: request.temperature,
            stream: false,
            messages: request.messages,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let payload = Self::to_api_request(request);

        let resp = match self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!(
                    "openai api error (timeout) [retryable]: request timed out after {REQUEST_TIMEOUT_SECS}s"
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("openai api error (connect) [retryable]: {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await?;
            let parsed = serde_json::from_str::<ApiErrorEnvelope>(&text).ok();
            return Err(format_api_error(status, parsed));
        }

        let body: ApiResponse = resp.json().await?;
        to_chat_response(body)
    }

    fn fingerprint(&self) -> String {
        credential_fingerprint(&self.api_key)
    }
}

fn to_chat_response(body: ApiResponse) -> Result<ChatResponse> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("openai api error: empty choices"))?;

    Ok(ChatResponse {
        text: choice.message.content.unwrap_or_default(),
        prompt_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
        completion_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
        finish_reason: choice.finish_reason,
    })
}

fn format_api_error(status: StatusCode, parsed: Option<ApiErrorEnvelope>) -> anyhow::Error {
    let kind = ProviderErrorKind::from_status(status);
    let retryable = if kind.is_retryable() {
        " [retryable]"
    } else {
        ""
    };
    if let Some(api_error) = parsed {
        anyhow!(
            "openai api error ({status}){retryable}: {} ({})",
            api_error.error.message,
            api_error.error.r#type
        )
    } else {
        anyhow!("openai api error ({status}){retryable}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub temperature: f32,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiResponse {
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiChoice {
    pub message: ApiAssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiAssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type")]
    pub r#type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_openai_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": {"content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })
    }

    #[test]
    fn to_api_request_is_never_streaming() {
        let req = ChatRequest::new(
            "gpt-3.5-turbo",
            0.7,
            vec![ChatMessage::system("rules"), ChatMessage::user("hi")],
        );
        let json = serde_json::to_value(OpenAiProvider::to_api_request(req)).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn api_response_text_and_usage() {
        let parsed: ApiResponse =
            serde_json::from_value(mock_openai_response("{\"Josh\":{}}")).unwrap();
        let resp = to_chat_response(parsed).unwrap();
        assert_eq!(resp.text, "{\"Josh\":{}}");
        assert_eq!(resp.prompt_tokens, Some(10));
        assert_eq!(resp.completion_tokens, Some(5));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn api_response_without_choices_fails() {
        let parsed: ApiResponse = serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        let err = to_chat_response(parsed).unwrap_err();
        assert!(err.to_string().contains("empty choices"));
    }

    #[test]
    fn format_api_error_retryable_for_429() {
        let err = format_api_error(
            StatusCode::TOO_MANY_REQUESTS,
            Some(ApiErrorEnvelope {
                error: ApiErrorBody {
                    r#type: "rate_limit_error".into(),
                    message: "too many requests".into(),
                },
            }),
        );
        assert!(err.to_string().contains("[retryable]"));
    }

    #[test]
    fn format_api_error_not_retryable_for_401() {
        let err = format_api_error(StatusCode::UNAUTHORIZED, None);
        assert!(!err.to_string().contains("[retryable]"));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn fingerprint_does_not_leak_key() {
        let provider = OpenAiProvider::new("sk-secret", "https://api.openai.com/v1");
        let fp = provider.fingerprint();
        assert!(!fp.contains("sk-secret"));
        assert_eq!(fp, credential_fingerprint("sk-secret"));
    }

    #[tokio::test]
    async fn chat_posts_to_completions_endpoint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response("hello")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("test-key", server.uri());
        let resp = provider
            .chat(ChatRequest::new(
                "gpt-3.5-turbo",
                0.7,
                vec![ChatMessage::user("hi")],
            ))
            .await
            .unwrap();

        assert_eq!(resp.text, "hello");
        assert_eq!(resp.prompt_tokens, Some(10));
    }

    #[tokio::test]
    async fn chat_surfaces_api_error_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"type": "server_error", "message": "overloaded"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("test-key", server.uri());
        let err = provider
            .chat(ChatRequest::new("m", 0.0, vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("overloaded"));
        assert!(msg.contains("[retryable]"));
    }
}
