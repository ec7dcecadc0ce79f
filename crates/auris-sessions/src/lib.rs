pub mod cache;
pub mod error;
pub mod store;
pub mod types;

pub use cache::{ConversationCache, ConversationCacheConfig, ExtractionEnqueuer, MemoryContextProvider};
pub use error::{Result, SessionError};
pub use store::ConversationStore;
pub use types::{CachedContext, Message, Session, SessionType};
