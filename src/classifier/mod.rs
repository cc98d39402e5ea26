pub mod backend;
pub mod client;
pub mod image_prep;
pub mod prompt;
pub mod retry;

pub use backend::{GeminiBackend, InferenceBackend};
pub use client::{ClassificationClient, ClassificationOutcome, ModelInfo};
pub use retry::RetryPolicy;
