//! Typed error-event bus (C11) and the outbound session-event envelope.
//!
//! External failures are never raised to callers in the real-time path —
//! they become events here instead (spec.md §7).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Severity;

/// Closed set of error types, per spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceErrorType {
    SttConnectionFailed,
    SttWebsocketClosed,
    SttTimeout,
    SttTranscriptionFailed,
    TtsSynthesisFailed,
    TtsServiceUnavailable,
    TtsTimeout,
    TtsInvalidVoice,
    LlmProviderFailed,
    LlmRateLimited,
    LlmInvalidResponse,
    LlmAuthenticationFailed,
    LlmTimeout,
    LlmFallbackTriggered,
    MemoryError,
}

/// `{service_name, error_type, user_message, technical_details, session_id?,
/// severity, retry_suggested}` per spec.md §4.11.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorEvent {
    pub service_name: String,
    pub error_type: ServiceErrorType,
    pub user_message: String,
    pub technical_details: String,
    pub session_id: Option<String>,
    pub severity: Severity,
    pub retry_suggested: bool,
}

impl ServiceErrorEvent {
    pub fn new(
        service_name: impl Into<String>,
        error_type: ServiceErrorType,
        user_message: impl Into<String>,
        technical_details: impl Into<String>,
    ) -> Self {
        let mut user_message = user_message.into();
        user_message.truncate(500);
        let mut technical_details = technical_details.into();
        technical_details.truncate(2000);

        Self {
            service_name: service_name.into(),
            error_type,
            user_message,
            technical_details,
            session_id: None,
            severity: Severity::Warning,
            retry_suggested: false,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn retry_suggested(mut self) -> Self {
        self.retry_suggested = true;
        self
    }
}

/// Named events broadcast toward the transport layer, per spec.md §6's
/// closed outbound event set. The transport layer itself is out of scope;
/// this is just the envelope shape every core service emits into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    PartialTranscript { session_id: String, text: String },
    FinalTranscript { session_id: String, text: String },
    AiResponseChunk { session_id: String, text: String },
    AiResponseComplete { session_id: String },
    TtsStart { session_id: String },
    TtsComplete { session_id: String },
    ServiceError(ServiceErrorEvent),
    MemoryExtractionQueued { task_id: String },
    MemoryExtractionProcessing { task_id: String },
    MemoryExtractionCompleted { task_id: String, fact_ids: Vec<String> },
    MemoryExtractionFailed { task_id: String, error: String },
    MemoryError { detail: String },
}

/// Shared broadcast bus. `Clone`-able; every subsystem gets a `Sender`
/// handle, matching `skynet-scheduler::SchedulerHandle`'s cloneable-handle
/// idiom for a background-owned resource.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OutboundEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Never fails the caller: a full or receiver-less bus just drops the
    /// event, matching spec.md's "errors never propagate past a service".
    pub fn publish(&self, event: OutboundEvent) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, event: ServiceErrorEvent) {
        self.publish(OutboundEvent::ServiceError(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Per-service callback handle, mirroring spec.md §4.11's
/// `error_callback(ServiceErrorEvent)`. Thin `Clone`-able wrapper so each
/// service can hold one without depending on the whole `EventBus` API.
#[derive(Clone)]
pub struct ErrorSink {
    bus: EventBus,
}

impl ErrorSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn emit(&self, event: ServiceErrorEvent) {
        self.bus.error(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_serializes_to_screaming_snake_case() {
        let json = serde_json::to_string(&ServiceErrorType::SttConnectionFailed).unwrap();
        assert_eq!(json, "\"STT_CONNECTION_FAILED\"");
    }

    #[test]
    fn user_message_is_truncated_to_500_chars() {
        let long = "x".repeat(600);
        let event = ServiceErrorEvent::new("stt", ServiceErrorType::SttTimeout, long, "details");
        assert_eq!(event.user_message.len(), 500);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(OutboundEvent::TtsComplete {
            session_id: "s1".into(),
        });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(OutboundEvent::TtsStart {
            session_id: "s1".into(),
        });
        let evt = rx.recv().await.unwrap();
        matches!(evt, OutboundEvent::TtsStart { .. });
    }
}
