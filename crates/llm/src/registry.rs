//! Model registry.
//!
//! Holds the current [`ModelDescriptor`]s. The registry is read on every
//! routing decision and written only when an external health/registry process
//! pushes new descriptors, so it sits behind a read-write lock.

use crate::routing::{PolicyTable, RoutingPolicy};
use crate::types::{Capability, HealthStatus, ModelDescriptor};
use bastion_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Registry file structure (JSON or YAML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,

    #[serde(rename = "routingPolicies", default)]
    pub routing_policies: Vec<RoutingPolicy>,
}

impl RegistryFile {
    /// Read a registry file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read model registry {:?}: {}", path, e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let file: RegistryFile = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };
        validate_models(&file.models)?;

        tracing::info!(
            "Loaded {} models and {} routing policies from {:?}",
            file.models.len(),
            file.routing_policies.len(),
            path
        );
        Ok(file)
    }

    /// Split into a live registry and a policy table.
    pub fn into_parts(self) -> (ModelRegistry, PolicyTable) {
        (
            ModelRegistry::from_models(self.models),
            PolicyTable::from_policies(self.routing_policies),
        )
    }
}

fn validate_models(models: &[ModelDescriptor]) -> AppResult<()> {
    models.iter().try_for_each(ModelDescriptor::validate)
}

/// External source of model descriptors (registry/health service).
#[async_trait::async_trait]
pub trait RegistrySource: Send + Sync {
    /// Fetch the full current descriptor list.
    async fn fetch(&self) -> AppResult<Vec<ModelDescriptor>>;
}

/// Registry source backed by an HTTP endpoint returning `{"models": [...]}`.
pub struct HttpRegistrySource {
    url: String,
    client: reqwest::Client,
}

impl HttpRegistrySource {
    /// Create a source polling `url`; each poll gives up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to build registry HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> AppResult<Vec<ModelDescriptor>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to reach model registry: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Llm(format!(
                "Model registry returned {}",
                response.status()
            )));
        }

        let file: RegistryFile = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse model registry: {}", e)))?;
        Ok(file.models)
    }
}

/// Read-mostly registry of model descriptors.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, ModelDescriptor>>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `models`.
    pub fn from_models(models: Vec<ModelDescriptor>) -> Self {
        let registry = Self::new();
        registry.replace_all(models);
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ModelDescriptor>> {
        match self.models.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ModelDescriptor>> {
        match self.models.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get a model by deployment id.
    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.read().get(id).cloned()
    }

    /// All models, sorted by id.
    pub fn all(&self) -> Vec<ModelDescriptor> {
        let mut models: Vec<_> = self.read().values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Models currently routable.
    pub fn healthy(&self) -> Vec<ModelDescriptor> {
        self.all()
            .into_iter()
            .filter(|m| m.health.is_routable())
            .collect()
    }

    /// Models supporting `capability`.
    pub fn by_capability(&self, capability: Capability) -> Vec<ModelDescriptor> {
        self.all()
            .into_iter()
            .filter(|m| m.capabilities.contains(&capability))
            .collect()
    }

    /// Update one model's health. Returns false for unknown ids.
    pub fn update_health(&self, id: &str, health: HealthStatus) -> bool {
        let mut models = self.write();
        match models.get_mut(id) {
            Some(model) => {
                if model.health != health {
                    tracing::info!("Model {} health {:?} -> {:?}", id, model.health, health);
                }
                model.health = health;
                true
            }
            None => false,
        }
    }

    /// Replace every descriptor at once.
    pub fn replace_all(&self, models: Vec<ModelDescriptor>) {
        let next: HashMap<_, _> = models.into_iter().map(|m| (m.id.clone(), m)).collect();
        *self.write() = next;
    }

    /// Pull fresh descriptors from an external source.
    ///
    /// On failure, including an invalid descriptor, the current descriptors
    /// are kept.
    pub async fn refresh(&self, source: &dyn RegistrySource) -> AppResult<usize> {
        let models = source.fetch().await?;
        validate_models(&models)?;
        let count = models.len();
        self.replace_all(models);
        tracing::debug!("Model registry refreshed with {} models", count);
        Ok(count)
    }

    /// Estimated cost of a call; zero for unknown models.
    pub fn estimate_cost(&self, id: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.read()
            .get(id)
            .map(|m| m.cost_for(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
