// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod chat;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod shutdown;
pub mod site;
pub mod status;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::chat::{ChatApi, Dispatcher};
pub use crate::classifier::{Classification, Classifier, NotifyPolicy};
pub use crate::ingest::registry::FeedRegistry;
pub use crate::ingest::types::{Feed, FeedKind, FeedSource, Post};
pub use crate::pipeline::PipelineMessage;
pub use crate::site::Site;
pub use crate::status::router;
pub use crate::store::Store;
