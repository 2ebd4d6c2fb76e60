//! Configuration management for Bastion.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - A YAML config file (`BASTION_CONFIG` or `./bastion.yaml`)
//! - Environment variables
//! - Command-line flags
//!
//! Identity providers, tenants, the search index and the model registry are
//! all described here; the crates that own those concerns read their
//! sections from [`AppConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Lower bound for the principal cache TTL.
pub const MIN_PRINCIPAL_TTL_SECS: u64 = 300;

/// Upper bound for the principal cache TTL.
pub const MAX_PRINCIPAL_TTL_SECS: u64 = 900;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config file the values were read from, if any
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Log level override
    #[serde(skip)]
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    #[serde(skip)]
    pub verbose: bool,

    /// Disable colored output
    #[serde(skip)]
    pub no_color: bool,

    /// Emit JSON log lines
    #[serde(skip)]
    pub json_logs: bool,

    /// Identity providers and principal cache settings
    pub identity: IdentityConfig,

    /// Per-tenant access settings
    pub tenants: BTreeMap<String, TenantConfig>,

    /// External search index
    pub index: IndexConfig,

    /// Model registry and generation settings
    pub models: ModelsConfig,

    /// End-to-end pipeline settings
    pub pipeline: PipelineConfig,
}

/// Identity resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// How long a resolved principal set stays valid
    #[serde(rename = "cacheTtlSecs", default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached (tenant, caller) entries
    #[serde(rename = "maxEntries", default = "default_max_entries")]
    pub max_entries: usize,

    /// Upstream fetch timeout on a cache miss
    #[serde(rename = "timeoutMs", default = "default_identity_timeout_ms")]
    pub timeout_ms: u64,

    /// Named identity providers
    #[serde(default)]
    pub providers: BTreeMap<String, IdentityProviderConfig>,
}

/// A single identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IdentityProviderConfig {
    /// Group-membership lookup over HTTP
    Http {
        endpoint: String,
        /// Content-source provider this directory speaks for (e.g., "box")
        source: String,
    },

    /// Fixed membership table, for local setups and demos
    Static {
        source: String,
        /// caller -> principal tokens
        #[serde(default)]
        members: BTreeMap<String, Vec<String>>,
    },
}

/// Tenant access settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Identity provider names consulted for this tenant
    #[serde(default)]
    pub providers: Vec<String>,

    /// Whether organization-wide sharing links grant access
    #[serde(rename = "allowOrgWideLinks", default)]
    pub allow_org_wide_links: bool,
}

/// External search index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the search service
    pub endpoint: Option<String>,

    /// JSON file of pre-indexed documents, used when no endpoint is set
    #[serde(rename = "documentsPath")]
    pub documents_path: Option<PathBuf>,

    /// Index name
    #[serde(rename = "indexName", default = "default_index_name")]
    pub index_name: String,

    /// Retrieval timeout
    #[serde(rename = "timeoutMs", default = "default_index_timeout_ms")]
    pub timeout_ms: u64,
}

/// Model registry and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// JSON or YAML file with `models` and `routingPolicies`
    #[serde(rename = "registryPath")]
    pub registry_path: Option<PathBuf>,

    /// Generation call timeout
    #[serde(rename = "generationTimeoutMs", default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,

    /// Environment variable holding the API key for hosted providers
    #[serde(rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,

    /// Registry/health service polled for current model descriptors
    #[serde(rename = "healthEndpoint")]
    pub health_endpoint: Option<String>,
}

/// End-to-end pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall deadline for one query
    #[serde(rename = "deadlineMs", default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Retry settings for retrieval and generation
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry settings for retryable stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "maxAttempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "baseDelayMs", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "maxDelayMs", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_identity_timeout_ms() -> u64 {
    1_000
}

fn default_index_name() -> String {
    "unstructured-data".to_string()
}

fn default_index_timeout_ms() -> u64 {
    3_000
}

fn default_generation_timeout_ms() -> u64 {
    10_000
}

fn default_deadline_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_entries: default_max_entries(),
            timeout_ms: default_identity_timeout_ms(),
            providers: BTreeMap::new(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            documents_path: None,
            index_name: default_index_name(),
            timeout_ms: default_index_timeout_ms(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            registry_path: None,
            generation_timeout_ms: default_generation_timeout_ms(),
            api_key_env: None,
            health_endpoint: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
            json_logs: false,
            identity: IdentityConfig::default(),
            tenants: BTreeMap::new(),
            index: IndexConfig::default(),
            models: ModelsConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Config file structure; every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    identity: Option<IdentityConfig>,
    #[serde(default)]
    tenants: BTreeMap<String, TenantConfig>,
    index: Option<IndexConfig>,
    models: Option<ModelsConfig>,
    pipeline: Option<PipelineConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl AppConfig {
    /// Load configuration from the config file and environment variables.
    ///
    /// Environment variables:
    /// - `BASTION_CONFIG`: Path to config file (default `./bastion.yaml`)
    /// - `BASTION_INDEX_ENDPOINT`: Search index base URL
    /// - `BASTION_REGISTRY`: Model registry file
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let explicit = std::env::var("BASTION_CONFIG").ok().map(PathBuf::from);
        let config_path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from("bastion.yaml"));

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else if explicit.is_some() {
            return Err(AppError::Config(format!(
                "Config file does not exist: {:?}",
                config_path
            )));
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Read a YAML config file on top of the defaults.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config = Self::from_yaml_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.config_file = Some(path.to_path_buf());

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse YAML config text on top of the defaults.
    pub fn from_yaml_str(contents: &str) -> AppResult<Self> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut config = Self::default();

        if let Some(identity) = file.identity {
            config.identity = identity;
        }
        config.tenants = file.tenants;
        if let Some(index) = file.index {
            config.index = index;
        }
        if let Some(models) = file.models {
            config.models = models;
        }
        if let Some(pipeline) = file.pipeline {
            config.pipeline = pipeline;
        }
        if let Some(logging) = file.logging {
            config.log_level = logging.level;
            if let Some(color) = logging.color {
                config.no_color = !color;
            }
            config.json_logs = logging.json.unwrap_or(false);
        }

        Ok(config)
    }

    /// Environment variables override the file.
    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("BASTION_INDEX_ENDPOINT") {
            self.index.endpoint = Some(endpoint);
        }

        // Repoints every HTTP directory, e.g. at a local stub
        if let Ok(endpoint) = std::env::var("BASTION_IDENTITY_ENDPOINT") {
            for provider in self.identity.providers.values_mut() {
                if let IdentityProviderConfig::Http { endpoint: current, .. } = provider {
                    *current = endpoint.clone();
                }
            }
        }

        if let Ok(registry) = std::env::var("BASTION_REGISTRY") {
            self.models.registry_path = Some(PathBuf::from(registry));
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over the file and the environment.
    pub fn with_overrides(
        mut self,
        config_file: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
        json_logs: bool,
    ) -> AppResult<Self> {
        if let Some(config_file) = config_file {
            let mut from_file = Self::from_file(&config_file)?;
            from_file.log_level = from_file.log_level.or(self.log_level.take());
            from_file.no_color |= self.no_color;
            self = from_file;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        if json_logs {
            self.json_logs = true;
        }

        Ok(self)
    }

    /// Principal cache TTL, clamped into the supported 5-15 minute window.
    pub fn principal_ttl(&self) -> Duration {
        let secs = self
            .identity
            .cache_ttl_secs
            .clamp(MIN_PRINCIPAL_TTL_SECS, MAX_PRINCIPAL_TTL_SECS);
        Duration::from_secs(secs)
    }

    /// Upstream identity fetch timeout.
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity.timeout_ms)
    }

    /// Retrieval timeout.
    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index.timeout_ms)
    }

    /// Generation timeout.
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.models.generation_timeout_ms)
    }

    /// End-to-end query deadline.
    pub fn query_deadline(&self) -> Duration {
        Duration::from_millis(self.pipeline.deadline_ms)
    }

    /// Look up a tenant's settings.
    pub fn tenant(&self, tenant: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant)
    }

    /// Resolve the API key for hosted generation providers.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.models
            .api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok())
    }

    /// Validate cross-references and timeouts.
    pub fn validate(&self) -> AppResult<()> {
        for (name, tenant) in &self.tenants {
            for provider in &tenant.providers {
                if !self.identity.providers.contains_key(provider) {
                    return Err(AppError::Config(format!(
                        "Tenant '{}' references unknown identity provider '{}'. Known: {}",
                        name,
                        provider,
                        self.identity
                            .providers
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            }
        }

        let timeouts = [
            ("identity.timeoutMs", self.identity.timeout_ms),
            ("index.timeoutMs", self.index.timeout_ms),
            ("models.generationTimeoutMs", self.models.generation_timeout_ms),
            ("pipeline.deadlineMs", self.pipeline.deadline_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(AppError::Config(format!("{} must be greater than zero", field)));
            }
        }

        if self.pipeline.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "pipeline.retry.maxAttempts must be at least 1".to_string(),
            ));
        }

        if self.identity.cache_ttl_secs < MIN_PRINCIPAL_TTL_SECS
            || self.identity.cache_ttl_secs > MAX_PRINCIPAL_TTL_SECS
        {
            tracing::warn!(
                "identity.cacheTtlSecs={} is outside {}..={}; clamping",
                self.identity.cache_ttl_secs,
                MIN_PRINCIPAL_TTL_SECS,
                MAX_PRINCIPAL_TTL_SECS
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
identity:
  cacheTtlSecs: 420
  timeoutMs: 800
  providers:
    box-directory:
      kind: http
      endpoint: http://authz:8083
      source: box
    local:
      kind: static
      source: microsoft
      members:
        bob: ["group:eng"]
tenants:
  t1:
    providers: [box-directory, local]
    allowOrgWideLinks: true
  t2:
    providers: [local]
index:
  endpoint: http://search:9200
models:
  registryPath: models.json
logging:
  level: warn
  color: false
"#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.identity.cache_ttl_secs, 600);
        assert_eq!(config.index.timeout_ms, 3_000);
        assert_eq!(config.models.generation_timeout_ms, 10_000);
        assert_eq!(config.pipeline.retry.max_attempts, 3);
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.identity.cache_ttl_secs, 420);
        assert_eq!(config.identity.providers.len(), 2);
        assert!(config.tenant("t1").unwrap().allow_org_wide_links);
        assert!(!config.tenant("t2").unwrap().allow_org_wide_links);
        assert_eq!(config.index.endpoint.as_deref(), Some("http://search:9200"));
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert!(config.no_color);
        assert!(config.validate().is_ok());

        match config.identity.providers.get("local").unwrap() {
            IdentityProviderConfig::Static { members, source } => {
                assert_eq!(source, "microsoft");
                assert_eq!(members.get("bob").unwrap(), &vec!["group:eng".to_string()]);
            }
            other => panic!("unexpected provider config: {:?}", other),
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.config_file.as_deref(), Some(file.path()));
        assert_eq!(config.tenants.len(), 2);
    }

    #[test]
    fn test_unknown_provider_reference() {
        let mut config = AppConfig::default();
        config.tenants.insert(
            "t1".to_string(),
            TenantConfig {
                providers: vec!["missing".to_string()],
                allow_org_wide_links: false,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown identity provider"));
    }

    #[test]
    fn test_ttl_is_clamped() {
        let mut config = AppConfig::default();
        config.identity.cache_ttl_secs = 5;
        assert_eq!(config.principal_ttl(), Duration::from_secs(300));

        config.identity.cache_ttl_secs = 3_600;
        assert_eq!(config.principal_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default()
            .with_overrides(None, None, true, true, false)
            .unwrap();
        assert!(config.verbose);
        assert!(config.no_color);
        assert_eq!(config.log_level, Some("debug".to_string()));
    }
}
