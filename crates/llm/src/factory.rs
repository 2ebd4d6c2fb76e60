//! Generation client factory.
//!
//! Builds the provider client for a routed [`ModelDescriptor`]. Secrets are
//! passed in by the caller; nothing here reads the environment.

use crate::client::LlmClient;
use crate::providers::{OllamaClient, OpenAiClient};
use crate::types::{ModelDescriptor, ProviderType};
use bastion_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create a client for `model`.
///
/// # Errors
/// Returns `AppError::Config` when an OpenAI-compatible model has no API key,
/// or `AppError::Llm` if the HTTP client cannot be built.
pub fn create_client(
    model: &ModelDescriptor,
    api_key: Option<&str>,
    timeout: Duration,
) -> AppResult<Arc<dyn LlmClient>> {
    match model.provider {
        ProviderType::Ollama => {
            let client = OllamaClient::with_timeout(&model.endpoint, timeout)?;
            Ok(Arc::new(client))
        }
        ProviderType::OpenAI => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Config(format!(
                    "Model {} requires an API key for {}",
                    model.id,
                    model.provider.as_str()
                ))
            })?;
            let client = OpenAiClient::with_timeout(&model.endpoint, api_key, timeout)?;
            Ok(Arc::new(client))
        }
    }
}

/// Builds clients for routed models.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, model: &ModelDescriptor) -> AppResult<Arc<dyn LlmClient>>;
}

/// Factory over [`create_client`] with one API key and timeout.
#[derive(Debug, Clone)]
pub struct ProviderClientFactory {
    api_key: Option<String>,
    timeout: Duration,
}

impl ProviderClientFactory {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self { api_key, timeout }
    }
}

impl ClientFactory for ProviderClientFactory {
    fn client_for(&self, model: &ModelDescriptor) -> AppResult<Arc<dyn LlmClient>> {
        create_client(model, self.api_key.as_deref(), self.timeout)
    }
}
