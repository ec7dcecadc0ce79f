use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// What the memory pipeline (C7) needs from the external vector store.
/// Implementations own the wire format; callers always see normalized
/// results via [`crate::normalize`].
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    /// Adds messages under `namespace`, with an optional extraction prompt
    /// and an `infer` flag (false forces verbatim storage without the
    /// store's own relevance filtering — used for manual fact creation).
    async fn add(
        &self,
        messages: &[Value],
        namespace: &str,
        prompt: Option<&str>,
        infer: bool,
    ) -> Result<Value>;

    async fn search(&self, query: &str, namespace: &str, limit: usize) -> Result<Value>;

    async fn delete(&self, vector_id: &str) -> Result<()>;
}

/// HTTP-backed Mem0-compatible vector store client, grounded on
/// `skynet-agent::openai::OpenAiProvider`'s reqwest usage.
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl VectorStoreClient for HttpVectorStore {
    async fn add(
        &self,
        messages: &[Value],
        namespace: &str,
        prompt: Option<&str>,
        infer: bool,
    ) -> Result<Value> {
        let mut body = serde_json::json!({
            "messages": messages,
            "user_id": namespace,
            "infer": infer,
        });
        if let Some(prompt) = prompt {
            body["prompt"] = Value::String(prompt.to_string());
        }

        let url = format!("{}/memories", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        respond(resp).await
    }

    async fn search(&self, query: &str, namespace: &str, limit: usize) -> Result<Value> {
        let body = serde_json::json!({
            "query": query,
            "user_id": namespace,
            "limit": limit,
        });

        let url = format!("{}/search", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        respond(resp).await
    }

    async fn delete(&self, vector_id: &str) -> Result<()> {
        let url = format!("{}/memories/{vector_id}", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(crate::error::VectorStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

async fn respond(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(crate::error::VectorStoreError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}
