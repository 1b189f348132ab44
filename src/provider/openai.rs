//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CompletionEvent, CompletionRequest, CompletionService, CompletionStream, Usage};
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A key is plausible when it has the `sk-` prefix and more than 20 characters
pub fn validate_api_key(api_key: &str) -> bool {
    api_key.starts_with("sk-") && api_key.len() > 20
}

pub struct OpenAiCompletionService {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompletionService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": request.stream,
        });
        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionStream> {
        tracing::debug!(
            model = %request.model,
            stream = request.stream,
            prompt_len = request.user_prompt.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Provider("invalid API key".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("HTTP {}: {}", status, text)));
        }

        if !request.stream {
            let completion: ChatCompletion = response.json().await?;
            return Ok(completion.into_stream());
        }

        let mut usage: Option<Usage> = None;
        let stream = response
            .bytes_stream()
            .eventsource()
            .map(move |event| {
                let event = event.map_err(|e| Error::Transport(e.to_string()))?;
                parse_stream_data(&event.data, &mut usage)
            })
            .filter_map(|result| async move { result.transpose() });

        Ok(Box::pin(stream))
    }
}

/// Decode one SSE `data:` payload. `[DONE]` closes the stream with whatever
/// usage an earlier chunk reported.
fn parse_stream_data(data: &str, usage: &mut Option<Usage>) -> Result<Option<CompletionEvent>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(CompletionEvent::Finished(usage.take())));
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| Error::Provider(format!("malformed stream chunk: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(Error::Provider(error.message));
    }
    if chunk.usage.is_some() {
        *usage = chunk.usage;
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty());
    Ok(delta.map(CompletionEvent::Delta))
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletion {
    fn into_stream(self) -> CompletionStream {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let mut events = Vec::new();
        if !content.is_empty() {
            events.push(Ok(CompletionEvent::Delta(content)));
        }
        events.push(Ok(CompletionEvent::Finished(self.usage)));
        Box::pin(futures::stream::iter(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("sk-1234567890abcdef1234567890abcdef"));
        assert!(!validate_api_key("invalid-key"));
        assert!(!validate_api_key("sk-short"));
        assert!(!validate_api_key(""));
    }

    #[test]
    fn test_builder_defaults_and_overrides() {
        let service = OpenAiCompletionService::new("sk-test")
            .with_base_url("http://localhost:8080/v1/")
            .with_max_tokens(256)
            .with_temperature(0.2);
        assert_eq!(service.base_url, "http://localhost:8080/v1");
        assert_eq!(service.max_tokens, 256);
        assert_eq!(OpenAiCompletionService::new("k").base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_request_body_shape() {
        let service = OpenAiCompletionService::new("sk-test");
        let body = service.request_body(&CompletionRequest {
            system_prompt: "sys".to_string(),
            user_prompt: "hello".to_string(),
            model: "gpt-4o-mini".to_string(),
            stream: true,
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_parse_stream_data_delta_usage_and_done() {
        let mut usage = None;
        let delta = parse_stream_data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#, &mut usage).unwrap();
        assert_eq!(delta, Some(CompletionEvent::Delta("Hi".to_string())));

        let none = parse_stream_data(
            r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
            &mut usage,
        )
        .unwrap();
        assert_eq!(none, None);

        let done = parse_stream_data("[DONE]", &mut usage).unwrap();
        match done {
            Some(CompletionEvent::Finished(Some(u))) => assert_eq!(u.total_tokens, 4),
            other => panic!("expected Finished with usage, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_stream_data_error_payload() {
        let mut usage = None;
        let err = parse_stream_data(r#"{"error":{"message":"overloaded"}}"#, &mut usage).unwrap_err();
        assert!(matches!(err, Error::Provider(msg) if msg == "overloaded"));
        assert!(parse_stream_data("not json", &mut usage).is_err());
    }

    #[tokio::test]
    async fn test_non_streaming_completion_becomes_two_events() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"Hello"}}],"usage":{"total_tokens":7}}"#,
        )
        .unwrap();
        let events: Vec<_> = completion.into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(CompletionEvent::Delta(s)) if s == "Hello"));
        assert!(matches!(&events[1], Ok(CompletionEvent::Finished(Some(u))) if u.total_tokens == 7));
    }
}
