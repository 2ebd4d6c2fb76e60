//! Provider implementations of [`LlmClient`](crate::client::LlmClient).

pub mod ollama;
pub mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
