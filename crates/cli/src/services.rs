//! Builds the runtime components from configuration.

use bastion_access::{IdentityDirectory, PrincipalResolver, ResolverSettings};
use bastion_core::{config::AppConfig, AppError, AppResult};
use bastion_knowledge::{
    HttpSearchIndex, MemoryIndex, QueryPipeline, RetrievalGateway, RetryPolicy, SearchIndex,
    StageTimeouts,
};
use bastion_llm::{BudgetLedger, HttpRegistrySource, ModelRouter, ProviderClientFactory, RegistryFile};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the search service key.
pub const SEARCH_API_KEY_ENV: &str = "BASTION_SEARCH_API_KEY";

/// How long the startup registry poll may take.
const HEALTH_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Router over the configured registry file with an empty in-process ledger.
pub fn load_router(config: &AppConfig) -> AppResult<ModelRouter> {
    let path = config
        .models
        .registry_path
        .as_ref()
        .ok_or_else(|| AppError::Config("models.registryPath is not set".to_string()))?;
    let (registry, policies) = RegistryFile::load(path)?.into_parts();
    Ok(ModelRouter::new(registry, policies, BudgetLedger::new()))
}

/// [`load_router`], then refresh descriptors from `models.healthEndpoint` if set.
///
/// A failed refresh keeps the file's descriptors.
pub async fn load_live_router(config: &AppConfig) -> AppResult<ModelRouter> {
    let router = load_router(config)?;
    if let Some(endpoint) = &config.models.health_endpoint {
        let source = HttpRegistrySource::new(endpoint, HEALTH_POLL_TIMEOUT)?;
        if let Err(err) = router.registry().refresh(&source).await {
            tracing::warn!("Keeping registry file descriptors: {}", err);
        }
    }
    Ok(router)
}

/// The remote index when an endpoint is configured, else the local documents file.
pub fn build_index(config: &AppConfig) -> AppResult<Arc<dyn SearchIndex>> {
    if let Some(endpoint) = &config.index.endpoint {
        let index = HttpSearchIndex::new(endpoint, &config.index.index_name, config.index_timeout())?
            .with_api_key(std::env::var(SEARCH_API_KEY_ENV).ok());
        return Ok(Arc::new(index));
    }
    if let Some(path) = &config.index.documents_path {
        return Ok(Arc::new(MemoryIndex::from_file(path)?));
    }
    Err(AppError::Config(
        "Either index.endpoint or index.documentsPath must be set".to_string(),
    ))
}

pub async fn build_pipeline(config: &AppConfig) -> AppResult<QueryPipeline> {
    config.validate()?;

    let directory = IdentityDirectory::from_config(config)?;
    let resolver = PrincipalResolver::new(directory, ResolverSettings::from_config(config));
    let gateway = RetrievalGateway::new(build_index(config)?);
    let router = load_live_router(config).await?;
    let clients = Arc::new(ProviderClientFactory::new(
        config.resolve_api_key(),
        config.generation_timeout(),
    ));

    tracing::debug!("Pipeline ready (index: {})", gateway.index_name());
    Ok(QueryPipeline::new(Arc::new(resolver), gateway, router, clients)?
        .with_retry(RetryPolicy::from_config(&config.pipeline.retry))
        .with_timeouts(StageTimeouts::from_config(config)))
}
