//! Generation models: registry, routing, budgets and provider clients.
//!
//! The [`ModelRouter`] picks a deployment per request from a tenant's
//! [`RoutingPolicy`], the live [`ModelRegistry`] and the [`BudgetLedger`].
//! Provider clients implement [`LlmClient`] and only know how to talk to
//! one API.
//!
//! # Example
//! ```no_run
//! use bastion_llm::{ModelRouter, Requirements, RegistryFile, BudgetLedger};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (registry, policies) = RegistryFile::load("models.yaml".as_ref())?.into_parts();
//! let router = ModelRouter::new(registry, policies, BudgetLedger::new());
//! let decision = router.select_model("contoso", "qa", &Requirements::default())?;
//! println!("{} ({:?})", decision.model.id, decision.reason);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod client;
pub mod factory;
pub mod providers;
pub mod registry;
pub mod routing;
pub mod types;
pub mod usage;

pub use budget::{BudgetKey, BudgetLedger, BudgetPeriod, Reservation};
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::{create_client, ClientFactory, ProviderClientFactory};
pub use providers::{OllamaClient, OpenAiClient};
pub use registry::{HttpRegistrySource, ModelRegistry, RegistryFile, RegistrySource};
pub use routing::{
    BudgetConstraints, ModelRouter, PolicyTable, Requirements, RouteDecision, RouteReason,
    RoutingPolicy,
};
pub use types::{Capability, HealthStatus, LatencyClass, ModelDescriptor, ProviderType};
pub use usage::{MemoryUsageSink, TracingUsageSink, UsageMeter, UsageRecord, UsageSink};
