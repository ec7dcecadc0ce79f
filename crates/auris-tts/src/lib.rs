pub mod client;
pub mod error;
pub mod types;

pub use client::{SharedTtsClient, TtsClient, TtsClientConfig};
pub use error::{Result, TtsError};
pub use types::{TtsMetricRecord, TtsStatus, VoiceInfo, VoiceParams};
