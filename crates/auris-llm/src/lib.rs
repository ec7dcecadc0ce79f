pub mod client;
pub mod error;
pub mod provider;
pub mod router;
pub mod types;

pub use client::{LlmRouterClient, ProviderLookup};
pub use error::{ProviderError, Result};
pub use provider::{HttpLlmProvider, LlmProvider};
pub use router::{ProviderRouter, ProviderSlot};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, GenerationConfig, ProviderKind, ProviderRow, ResolvedEndpoint, Role,
    StreamEvent,
};
