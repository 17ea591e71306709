use crate::{
    errors::AiError,
    providers::ai::{AiProvider, TokenStream},
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, info};

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f32,
    max_tokens: i32,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize, Debug)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatStreamChoice {
    delta: ChatDelta,
}

#[derive(Deserialize, Debug, Default)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

// --- Local Provider implementation ---

/// A provider for interacting with a local or OpenAI-compatible API.
#[derive(Clone, Debug)]
pub struct LocalAiProvider {
    client: ReqwestClient,
    api_url: String,
    api_key: Option<String>,
    model: Option<String>,
    temperature: f32,
    max_tokens: i32,
}

impl LocalAiProvider {
    /// Creates a new `LocalAiProvider`.
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        model: Option<String>,
        temperature: f32,
        max_tokens: i32,
    ) -> Result<Self, AiError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(AiError::ClientBuild)?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            temperature,
            max_tokens,
        })
    }

    fn request_body<'a>(
        &'a self,
        system_prompt: &str,
        user_prompt: &str,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            model: self.model.as_deref(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }
}

/// Drains all complete `data:` lines from an SSE buffer, returning the text
/// fragments they carry. Partial lines stay in the buffer until the next
/// network chunk completes them.
fn drain_sse_buffer(buffer: &mut String) -> Vec<Result<String, AiError>> {
    let mut tokens = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<ChatStreamChunk>(data) {
            Ok(chunk) => {
                if let Some(text) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                {
                    if !text.is_empty() {
                        tokens.push(Ok(text));
                    }
                }
            }
            Err(e) => tokens.push(Err(AiError::Api(format!("malformed stream chunk: {e}")))),
        }
    }
    tokens
}

#[async_trait]
impl AiProvider for LocalAiProvider {
    /// Generates a complete response from a given system and user prompt.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AiError> {
        let request_body = self.request_body(system_prompt, user_prompt, false);

        debug!(payload = ?request_body, "--> Sending request to chat provider");
        let mut request_builder = self.client.post(&self.api_url);

        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let response = request_builder
            .json(&request_body)
            .send()
            .await
            .map_err(AiError::Request)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiError::Api(error_text));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(AiError::Deserialization)?;

        let raw_response = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(raw_response)
    }

    /// Generates a response as an SSE token stream.
    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TokenStream, AiError> {
        let request_body = self.request_body(system_prompt, user_prompt, true);

        info!("--> Opening streaming chat request to {}", self.api_url);
        let mut request_builder = self
            .client
            .post(&self.api_url)
            .header("Accept", "text/event-stream");

        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let response = request_builder
            .json(&request_body)
            .send()
            .await
            .map_err(AiError::Request)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AiError::Api(error_text));
        }

        // SSE frames may split across network chunks; carry the partial
        // line forward in the scan state.
        let tokens = response
            .bytes_stream()
            .scan(String::new(), |buffer, next| {
                let out = match next {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_sse_buffer(buffer)
                    }
                    Err(e) => vec![Err(AiError::Request(e))],
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(Box::pin(tokens))
    }
}
