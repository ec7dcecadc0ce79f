use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::{ProviderError, Result};
use crate::types::{ChatRequest, ChatResponse, Role, StreamEvent};

/// Grounded on `skynet-agent::provider::LlmProvider` / `openai.rs`'s
/// `OpenAiProvider`: every provider kind in this router speaks the same
/// OpenAI-compatible chat-completions wire format (OpenRouter, local
/// llama.cpp-style servers, and stored custom providers all advertise
/// OpenAI-compatible endpoints).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, request: ChatRequest) -> Result<ChatResponse>;
    async fn send_stream(&self, request: ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<()>;
}

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    provider_name: String,
    chat_path: String,
}

impl HttpLlmProvider {
    pub fn new(provider_name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            provider_name: provider_name.into(),
            chat_path: "/chat/completions".to_string(),
        }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({"role": role, "content": m.content})
            })
            .collect();

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": request.stream,
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let body = self.build_body(&request);
        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::Authentication);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&request.model)
            .to_string();

        Ok(ChatResponse { text, model })
    }

    async fn send_stream(&self, request: ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let mut stream_request = request;
        stream_request.stream = true;
        let body = self.build_body(&stream_request);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            let _ = tx.send(StreamEvent::Error("rate limited".to_string())).await;
            return Err(ProviderError::RateLimited { retry_after_ms: None });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let _ = tx.send(StreamEvent::Error(message.clone())).await;
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Http(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    let _ = tx.send(StreamEvent::Done).await;
                    return Ok(());
                }
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(delta) = value
                        .get("choices")
                        .and_then(|c| c.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|choice| choice.get("delta"))
                        .and_then(|d| d.get("content"))
                        .and_then(|c| c.as_str())
                    {
                        if tx.send(StreamEvent::TextDelta(delta.to_string())).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn build_body_maps_roles_to_openai_strings() {
        let provider = HttpLlmProvider::new("test", "http://localhost", None);
        let request = ChatRequest {
            model: "gpt".to_string(),
            messages: vec![
                ChatMessage::new(Role::System, "be helpful"),
                ChatMessage::new(Role::User, "hi"),
            ],
            temperature: 0.7,
            stream: false,
        };
        let body = provider.build_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["model"], "gpt");
    }
}
