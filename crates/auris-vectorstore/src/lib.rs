//! Vector store client and response normalizer (C2): the only place that
//! recognizes either of the store's two wire shapes, plus a bounded
//! dispatcher so calls to it never stall the rest of the process.

mod client;
mod error;
mod normalize;
mod pool;

pub use client::{HttpVectorStore, VectorStoreClient};
pub use error::{Result, VectorStoreError};
pub use normalize::{normalize_add_response, normalize_search_response, NormalizedResult};
pub use pool::VectorStorePool;
