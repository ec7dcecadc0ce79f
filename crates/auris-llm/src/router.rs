use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{ProviderError, Result};
use crate::provider::LlmProvider;
use crate::types::{ChatRequest, ChatResponse, StreamEvent};

/// Grounded on `skynet-agent::router::ProviderSlot`/`ProviderRouter`:
/// providers are tried in priority order, each with its own retry budget;
/// `RateLimited` short-circuits straight to the next slot.
pub struct ProviderSlot {
    pub provider: Arc<dyn LlmProvider>,
    pub max_retries: u32,
}

pub struct ProviderRouter {
    pub slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self { slots }
    }

    pub async fn send(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut last_error = ProviderError::Unavailable;

        for slot in &self.slots {
            for attempt in 0..=slot.max_retries {
                match slot.provider.send(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(ProviderError::RateLimited { retry_after_ms }) => {
                        warn!(provider = slot.provider.name(), ?retry_after_ms, "rate limited");
                        last_error = ProviderError::RateLimited { retry_after_ms };
                        break;
                    }
                    Err(e) => {
                        warn!(provider = slot.provider.name(), attempt, error = %e, "provider call failed");
                        last_error = e;
                        if attempt < slot.max_retries {
                            tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                        }
                    }
                }
            }
        }

        Err(last_error)
    }

    pub async fn send_stream(&self, request: ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
        let mut last_error = ProviderError::Unavailable;

        for slot in &self.slots {
            for attempt in 0..=slot.max_retries {
                match slot.provider.send_stream(request.clone(), tx.clone()).await {
                    Ok(()) => return Ok(()),
                    Err(ProviderError::RateLimited { retry_after_ms }) => {
                        last_error = ProviderError::RateLimited { retry_after_ms };
                        break;
                    }
                    Err(e) => {
                        warn!(provider = slot.provider.name(), attempt, error = %e, "streaming call failed");
                        last_error = e;
                        if attempt < slot.max_retries {
                            tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                        }
                    }
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFail {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn send(&self, _request: ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        }
        async fn send_stream(&self, _request: ChatRequest, _tx: mpsc::Sender<StreamEvent>) -> Result<()> {
            Err(ProviderError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn send(&self, request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                text: "hi there".to_string(),
                model: request.model,
            })
        }
        async fn send_stream(&self, _request: ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
            let _ = tx.send(StreamEvent::TextDelta("hi".to_string())).await;
            let _ = tx.send(StreamEvent::Done).await;
            Ok(())
        }
    }

    fn dummy_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            messages: vec![],
            temperature: 0.7,
            stream: false,
        }
    }

    #[tokio::test]
    async fn router_falls_back_to_second_provider() {
        let failing = Arc::new(AlwaysFail {
            calls: AtomicUsize::new(0),
        });
        let router = ProviderRouter::new(vec![
            ProviderSlot {
                provider: failing.clone(),
                max_retries: 0,
            },
            ProviderSlot {
                provider: Arc::new(AlwaysOk),
                max_retries: 0,
            },
        ]);

        let response = router.send(dummy_request()).await.unwrap();
        assert_eq!(response.text, "hi there");
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn router_errors_when_all_fail() {
        let router = ProviderRouter::new(vec![ProviderSlot {
            provider: Arc::new(AlwaysFail {
                calls: AtomicUsize::new(0),
            }),
            max_retries: 1,
        }]);

        assert!(router.send(dummy_request()).await.is_err());
    }
}
