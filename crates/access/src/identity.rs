//! Identity providers.
//!
//! A provider answers "which groups and scopes does this caller hold" for one
//! content source (e.g., Box, Microsoft). The [`IdentityDirectory`] knows which
//! providers apply to which tenant.

use crate::principal::Principal;
use bastion_core::config::{AppConfig, IdentityProviderConfig};
use bastion_core::{AppError, AppResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Group-membership lookup for one content-source provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Configured provider name.
    fn name(&self) -> &str;

    /// Memberships of `caller` within `tenant`.
    async fn memberships(&self, tenant: &str, caller: &str) -> AppResult<Vec<Principal>>;
}

/// Tokens without a kind prefix are group ids scoped to the provider's source.
fn scoped_principal(source: &str, raw: &str) -> Option<Principal> {
    if raw.contains(':') {
        match Principal::parse(raw) {
            Ok(principal) => Some(principal),
            Err(e) => {
                tracing::warn!("Ignoring malformed principal from {}: {}", source, e);
                None
            }
        }
    } else if raw.trim().is_empty() {
        None
    } else {
        Some(Principal::group(format!("{}/{}", source, raw.trim())))
    }
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    principals: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}

/// Directory service reached over HTTP.
///
/// `GET {endpoint}/resolve?upn=..&tenant_id=..&provider=..` returning
/// `{"principals": [...], "groups": [...]}`.
pub struct HttpIdentityProvider {
    name: String,
    source: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build identity HTTP client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            source: source.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn memberships(&self, tenant: &str, caller: &str) -> AppResult<Vec<Principal>> {
        let url = format!("{}/resolve", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("upn", caller), ("tenant_id", tenant), ("provider", self.source.as_str())])
            .send()
            .await
            .map_err(|e| AppError::IdentityUnavailable(format!("{}: {}", self.name, e)))?;

        if !response.status().is_success() {
            return Err(AppError::IdentityUnavailable(format!(
                "{} returned {}",
                self.name,
                response.status()
            )));
        }

        let body: ResolveResponse = response.json().await.map_err(|e| {
            AppError::IdentityUnavailable(format!("{} sent an unreadable response: {}", self.name, e))
        })?;

        Ok(body
            .principals
            .iter()
            .chain(&body.groups)
            .filter_map(|raw| scoped_principal(&self.source, raw))
            .collect())
    }
}

/// Fixed membership table.
pub struct StaticIdentityProvider {
    name: String,
    members: HashMap<String, Vec<Principal>>,
}

impl StaticIdentityProvider {
    pub fn new(name: impl Into<String>, source: &str, members: HashMap<String, Vec<String>>) -> Self {
        let members = members
            .into_iter()
            .map(|(caller, tokens)| {
                let principals = tokens
                    .iter()
                    .filter_map(|raw| scoped_principal(source, raw))
                    .collect();
                (caller, principals)
            })
            .collect();
        Self {
            name: name.into(),
            members,
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn memberships(&self, _tenant: &str, caller: &str) -> AppResult<Vec<Principal>> {
        Ok(self.members.get(caller).cloned().unwrap_or_default())
    }
}

/// Per-tenant identity settings.
#[derive(Clone, Default)]
pub struct TenantIdentity {
    pub providers: Vec<Arc<dyn IdentityProvider>>,
    /// Organization-wide link principals are kept only when set
    pub allow_org_wide_links: bool,
}

/// Which identity providers apply to which tenant.
#[derive(Clone, Default)]
pub struct IdentityDirectory {
    tenants: HashMap<String, TenantIdentity>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>, identity: TenantIdentity) -> Self {
        self.tenants.insert(tenant.into(), identity);
        self
    }

    /// Build the directory from `identity` and `tenants` config sections.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let mut providers: HashMap<&str, Arc<dyn IdentityProvider>> = HashMap::new();
        for (name, provider) in &config.identity.providers {
            let built: Arc<dyn IdentityProvider> = match provider {
                IdentityProviderConfig::Http { endpoint, source } => Arc::new(
                    HttpIdentityProvider::new(name, source, endpoint, config.identity_timeout())?,
                ),
                IdentityProviderConfig::Static { source, members } => Arc::new(
                    StaticIdentityProvider::new(name, source, members.clone().into_iter().collect()),
                ),
            };
            providers.insert(name.as_str(), built);
        }

        let mut directory = Self::new();
        for (tenant, settings) in &config.tenants {
            let mut tenant_providers = Vec::with_capacity(settings.providers.len());
            for name in &settings.providers {
                let provider = providers.get(name.as_str()).ok_or_else(|| {
                    AppError::Config(format!(
                        "Tenant '{}' references unknown identity provider '{}'",
                        tenant, name
                    ))
                })?;
                tenant_providers.push(Arc::clone(provider));
            }
            directory = directory.with_tenant(
                tenant.clone(),
                TenantIdentity {
                    providers: tenant_providers,
                    allow_org_wide_links: settings.allow_org_wide_links,
                },
            );
        }

        tracing::debug!(
            "Identity directory: {} providers, {} tenants",
            providers.len(),
            directory.tenants.len()
        );
        Ok(directory)
    }

    pub fn tenant(&self, tenant: &str) -> Option<&TenantIdentity> {
        self.tenants.get(tenant)
    }
}
