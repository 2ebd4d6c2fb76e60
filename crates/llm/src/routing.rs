//! Routing policies and the Model Router.
//!
//! Selection is one function over data: the policy's ordered chain, the
//! registry descriptors and the budget ledger go in, a [`RouteDecision`]
//! comes out. Models are never dispatched on by type.

use crate::budget::{BudgetKey, BudgetLedger, BudgetPeriod, Reservation};
use crate::registry::ModelRegistry;
use crate::types::{Capability, LatencyClass, ModelDescriptor};
use bastion_core::{AppError, AppResult, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Tenant whose policies apply when a tenant has none of its own.
pub const DEFAULT_TENANT: &str = "default";

/// Prompt size assumed when the caller gives no estimate.
pub const DEFAULT_INPUT_TOKENS: u32 = 1000;

/// Completion size assumed for cost estimates.
pub const DEFAULT_OUTPUT_TOKENS: u32 = 500;

/// Budget settings of a routing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConstraints {
    /// Hard spend ceiling for one period
    #[serde(rename = "periodBudget")]
    pub period_budget: f64,

    /// Fraction of the budget (0.0-1.0) at which the primary is no longer used
    #[serde(rename = "costThreshold")]
    pub cost_threshold: f64,

    /// Walk the fallback chain once the threshold is reached
    #[serde(rename = "automaticDownshift", default = "default_true")]
    pub automatic_downshift: bool,
}

fn default_true() -> bool {
    true
}

impl BudgetConstraints {
    /// Spend at which the primary model stops being affordable.
    pub fn threshold_amount(&self) -> f64 {
        self.period_budget * self.cost_threshold.clamp(0.0, 1.0)
    }
}

/// Per `(tenant, feature)` routing rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub tenant: String,
    pub feature: String,

    pub primary: String,

    #[serde(default)]
    pub fallback: Option<String>,

    #[serde(rename = "budgetFallback", default)]
    pub budget_fallback: Option<String>,

    pub budget: BudgetConstraints,

    /// When false, cheaper models are tried before the primary
    #[serde(rename = "qualityPriority", default = "default_true")]
    pub quality_priority: bool,
}

impl RoutingPolicy {
    /// Candidate chain in evaluation order.
    pub fn chain(&self) -> Vec<(&str, ChainRole)> {
        let primary = Some((self.primary.as_str(), ChainRole::Primary));
        let fallback = self.fallback.as_deref().map(|m| (m, ChainRole::Fallback));
        let budget = self
            .budget_fallback
            .as_deref()
            .map(|m| (m, ChainRole::BudgetFallback));

        let ordered = if self.quality_priority {
            [primary, fallback, budget]
        } else {
            [fallback, primary, budget]
        };
        ordered.into_iter().flatten().collect()
    }
}

/// Position of a model in a policy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRole {
    Primary,
    Fallback,
    BudgetFallback,
}

/// Routing policies keyed by `(tenant, feature)`.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<(String, String), RoutingPolicy>,
}

impl PolicyTable {
    pub fn from_policies(policies: Vec<RoutingPolicy>) -> Self {
        let policies = policies
            .into_iter()
            .map(|p| ((p.tenant.clone(), p.feature.clone()), p))
            .collect();
        Self { policies }
    }

    /// Tenant policy, or the default tenant's policy for the feature.
    pub fn lookup(&self, tenant: &str, feature: &str) -> Option<&RoutingPolicy> {
        self.policies
            .get(&(tenant.to_string(), feature.to_string()))
            .or_else(|| {
                self.policies
                    .get(&(DEFAULT_TENANT.to_string(), feature.to_string()))
            })
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// What a generation call needs from a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub capabilities: BTreeSet<Capability>,

    /// Slowest acceptable latency class
    pub max_latency: Option<LatencyClass>,

    /// Estimated prompt tokens; also the minimum context length
    pub estimated_input_tokens: Option<u32>,

    /// Caller-requested model, honored only if it passes every check
    pub model_override: Option<String>,
}

impl Requirements {
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_max_latency(mut self, latency: LatencyClass) -> Self {
        self.max_latency = Some(latency);
        self
    }

    pub fn with_estimated_input_tokens(mut self, tokens: u32) -> Self {
        self.estimated_input_tokens = Some(tokens);
        self
    }

    pub fn with_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    fn input_tokens(&self) -> u32 {
        self.estimated_input_tokens.unwrap_or(DEFAULT_INPUT_TOKENS)
    }
}

/// Why a model was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The policy's first choice
    Primary,
    /// A non-primary model of the policy chain
    Fallback,
    /// Spend reached the policy threshold
    BudgetDownshift,
    /// The caller's override passed every check
    Override,
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub model: ModelDescriptor,
    pub reason: RouteReason,
    pub tenant: String,
    pub feature: String,
    pub period: BudgetPeriod,
    pub estimated_cost: f64,
    /// Hard ceiling the generation call is reserved against
    pub ceiling: f64,
}

impl RouteDecision {
    pub fn budget_key(&self) -> BudgetKey {
        BudgetKey::new(&self.tenant, &self.feature, self.period.clone())
    }
}

/// Chooses a generation model per request.
#[derive(Clone)]
pub struct ModelRouter {
    registry: ModelRegistry,
    policies: Arc<PolicyTable>,
    ledger: BudgetLedger,
    clock: Arc<dyn Clock>,
}

impl ModelRouter {
    pub fn new(registry: ModelRegistry, policies: PolicyTable, ledger: BudgetLedger) -> Self {
        Self {
            registry,
            policies: Arc::new(policies),
            ledger,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for budget periods.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn current_period(&self) -> BudgetPeriod {
        BudgetPeriod::monthly(self.clock.now())
    }

    /// Select a model for `(tenant, feature)`.
    ///
    /// Filters the policy chain by capability and health, then applies the
    /// budget: below the threshold the first eligible model wins; at or above
    /// it (with automatic downshift) the primary is skipped and the first
    /// eligible model that still fits under the period ceiling wins.
    pub fn select_model(
        &self,
        tenant: &str,
        feature: &str,
        requirements: &Requirements,
    ) -> AppResult<RouteDecision> {
        let policy = self.policies.lookup(tenant, feature).ok_or_else(|| {
            AppError::NoEligibleModel(format!("no routing policy for {}/{}", tenant, feature))
        })?;

        let period = self.current_period();
        let key = BudgetKey::new(tenant, feature, period.clone());
        let exposure = self.ledger.exposure(&key);
        let ceiling = policy.budget.period_budget;
        let over_threshold = exposure >= policy.budget.threshold_amount();
        let input_tokens = requirements.input_tokens();

        let decide = |model: ModelDescriptor, reason: RouteReason| {
            let estimated_cost = model.cost_for(input_tokens, DEFAULT_OUTPUT_TOKENS);
            RouteDecision {
                model,
                reason,
                tenant: tenant.to_string(),
                feature: feature.to_string(),
                period: period.clone(),
                estimated_cost,
                ceiling,
            }
        };
        let affordable =
            |model: &ModelDescriptor| exposure + model.cost_for(input_tokens, DEFAULT_OUTPUT_TOKENS) <= ceiling;
        let downshifting = over_threshold && policy.budget.automatic_downshift;

        if let Some(requested) = &requirements.model_override {
            // While downshifting only the non-primary chain models may be chosen
            let permitted = !downshifting
                || policy
                    .chain()
                    .iter()
                    .any(|(id, role)| *id == requested.as_str() && *role != ChainRole::Primary);
            match self.eligible(requested, requirements) {
                Some(model) if permitted && affordable(&model) => {
                    tracing::info!("Using model override {} for {}/{}", requested, tenant, feature);
                    return Ok(decide(model, RouteReason::Override));
                }
                _ => tracing::warn!(
                    "Model override {} rejected for {}/{}; falling back to policy",
                    requested,
                    tenant,
                    feature
                ),
            }
        }

        let mut saw_eligible = false;

        for (id, role) in policy.chain() {
            let Some(model) = self.eligible(id, requirements) else {
                tracing::debug!("Model {} not eligible for {}/{}", id, tenant, feature);
                continue;
            };
            saw_eligible = true;

            if downshifting && role == ChainRole::Primary {
                tracing::debug!(
                    "Skipping primary {} for {}/{}: spend {:.4} at or above threshold {:.4}",
                    id,
                    tenant,
                    feature,
                    exposure,
                    policy.budget.threshold_amount()
                );
                continue;
            }

            if !affordable(&model) {
                tracing::debug!("Model {} would exceed the {} ceiling", id, period);
                continue;
            }

            let reason = match role {
                _ if downshifting => RouteReason::BudgetDownshift,
                ChainRole::Primary => RouteReason::Primary,
                ChainRole::Fallback | ChainRole::BudgetFallback => RouteReason::Fallback,
            };

            let decision = decide(model, reason);
            tracing::info!(
                "Selected model {} for {}/{} ({:?}, estimated cost {:.5})",
                decision.model.id,
                tenant,
                feature,
                decision.reason,
                decision.estimated_cost
            );
            return Ok(decision);
        }

        if saw_eligible {
            Err(AppError::BudgetExceededHard(format!(
                "no affordable model for {}/{} in {}",
                tenant, feature, period
            )))
        } else {
            Err(AppError::NoEligibleModel(format!(
                "no healthy model with {:?} for {}/{}",
                requirements.capabilities, tenant, feature
            )))
        }
    }

    /// Select a model and hold its estimated cost against the period ceiling.
    ///
    /// A lost race for the last of the budget re-runs selection, which then
    /// sees the higher exposure and downshifts or fails.
    pub fn select_and_reserve(
        &self,
        tenant: &str,
        feature: &str,
        requirements: &Requirements,
    ) -> AppResult<(RouteDecision, Reservation)> {
        let mut last_err = None;
        for _ in 0..3 {
            let decision = self.select_model(tenant, feature, requirements)?;
            match self.ledger.reserve(
                &decision.budget_key(),
                decision.estimated_cost,
                decision.ceiling,
            ) {
                Ok(reservation) => return Ok((decision, reservation)),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AppError::BudgetExceededHard(format!("{}/{} budget exhausted", tenant, feature))
        }))
    }

    /// Registered, healthy and capable of every requirement.
    fn eligible(&self, id: &str, requirements: &Requirements) -> Option<ModelDescriptor> {
        let model = self.registry.get(id)?;
        if !model.health.is_routable() || !model.supports_all(&requirements.capabilities) {
            return None;
        }
        if let Some(max_latency) = requirements.max_latency {
            if !model.performance.latency.meets(max_latency) {
                return None;
            }
        }
        if let Some(tokens) = requirements.estimated_input_tokens {
            if tokens > model.performance.context_length {
                return None;
            }
        }
        Some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::model;
    use crate::types::HealthStatus;
    use bastion_core::ManualClock;
    use chrono::{TimeZone, Utc};

    fn qa_policy() -> RoutingPolicy {
        RoutingPolicy {
            tenant: "t1".to_string(),
            feature: "qa".to_string(),
            primary: "gpt-4o".to_string(),
            fallback: Some("gpt-4o-mini".to_string()),
            budget_fallback: Some("llama3".to_string()),
            budget: BudgetConstraints {
                period_budget: 100.0,
                cost_threshold: 0.8,
                automatic_downshift: true,
            },
            quality_priority: true,
        }
    }

    fn router_with(policy: RoutingPolicy) -> ModelRouter {
        let registry = ModelRegistry::from_models(vec![
            model("gpt-4o", &[Capability::Chat, Capability::ToolUse, Capability::Vision], 0.005, 0.015),
            model("gpt-4o-mini", &[Capability::Chat, Capability::ToolUse], 0.00015, 0.0006),
            model("llama3", &[Capability::Chat], 0.0, 0.0),
        ]);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap());
        ModelRouter::new(registry, PolicyTable::from_policies(vec![policy]), BudgetLedger::new())
            .with_clock(Arc::new(clock))
    }

    fn spend(router: &ModelRouter, amount: f64) {
        let key = BudgetKey::new("t1", "qa", router.current_period());
        router.ledger().record(&key, amount).unwrap();
    }

    #[test]
    fn test_primary_below_threshold() {
        let router = router_with(qa_policy());
        spend(&router, 10.0);

        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o");
        assert_eq!(decision.reason, RouteReason::Primary);
    }

    #[test]
    fn test_downshift_at_threshold() {
        // Budget at 0.85 of the period budget, threshold 0.8
        let router = router_with(qa_policy());
        spend(&router, 85.0);

        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o-mini");
        assert_eq!(decision.reason, RouteReason::BudgetDownshift);
    }

    #[test]
    fn test_no_downshift_keeps_primary_under_ceiling() {
        let mut policy = qa_policy();
        policy.budget.automatic_downshift = false;
        let router = router_with(policy);
        spend(&router, 85.0);

        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o");
    }

    #[test]
    fn test_capability_filter_skips_primary() {
        let router = router_with(qa_policy());
        router.registry().update_health("gpt-4o", HealthStatus::Degraded);

        let requirements = Requirements::default().with_capability(Capability::ToolUse);
        let decision = router.select_model("t1", "qa", &requirements).unwrap();
        assert_eq!(decision.model.id, "gpt-4o-mini");
        assert_eq!(decision.reason, RouteReason::Fallback);
    }

    #[test]
    fn test_no_eligible_model() {
        let router = router_with(qa_policy());
        router.registry().update_health("gpt-4o", HealthStatus::Unhealthy);

        let requirements = Requirements::default().with_capability(Capability::Vision);
        let err = router.select_model("t1", "qa", &requirements).unwrap_err();
        assert!(matches!(err, AppError::NoEligibleModel(_)));
    }

    #[test]
    fn test_missing_policy_is_no_eligible_model() {
        let router = router_with(qa_policy());
        let err = router
            .select_model("t1", "summarize", &Requirements::default())
            .unwrap_err();
        assert!(matches!(err, AppError::NoEligibleModel(_)));
    }

    #[test]
    fn test_budget_exceeded_hard() {
        let mut policy = qa_policy();
        policy.budget_fallback = None;
        let router = router_with(policy);
        spend(&router, 100.0);

        let err = router
            .select_model("t1", "qa", &Requirements::default())
            .unwrap_err();
        assert!(matches!(err, AppError::BudgetExceededHard(_)));
    }

    #[test]
    fn test_budget_fallback_is_last_resort() {
        let router = router_with(qa_policy());
        spend(&router, 100.0);

        // Only the free model still fits under the ceiling
        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "llama3");
        assert_eq!(decision.reason, RouteReason::BudgetDownshift);
    }

    #[test]
    fn test_cost_optimized_order() {
        let mut policy = qa_policy();
        policy.quality_priority = false;
        let router = router_with(policy);

        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o-mini");
        assert_eq!(decision.reason, RouteReason::Fallback);

        router.registry().update_health("gpt-4o-mini", HealthStatus::Unhealthy);
        let decision = router.select_model("t1", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o");
        assert_eq!(decision.reason, RouteReason::Primary);
    }

    #[test]
    fn test_default_tenant_policy() {
        let mut policy = qa_policy();
        policy.tenant = DEFAULT_TENANT.to_string();
        let router = router_with(policy);

        let decision = router.select_model("t9", "qa", &Requirements::default()).unwrap();
        assert_eq!(decision.model.id, "gpt-4o");
        assert_eq!(decision.tenant, "t9");
    }

    #[test]
    fn test_override_honored_only_when_eligible() {
        let router = router_with(qa_policy());

        let ok = Requirements::default().with_override("llama3");
        assert_eq!(
            router.select_model("t1", "qa", &ok).unwrap().reason,
            RouteReason::Override
        );

        let rejected = Requirements::default()
            .with_capability(Capability::ToolUse)
            .with_override("llama3");
        let decision = router.select_model("t1", "qa", &rejected).unwrap();
        assert_eq!(decision.model.id, "gpt-4o");
        assert_eq!(decision.reason, RouteReason::Primary);
    }

    #[test]
    fn test_override_cannot_bypass_downshift() {
        let router = router_with(qa_policy());
        spend(&router, 85.0);

        let primary = Requirements::default().with_override("gpt-4o");
        let decision = router.select_model("t1", "qa", &primary).unwrap();
        assert_eq!(decision.model.id, "gpt-4o-mini");
        assert_eq!(decision.reason, RouteReason::BudgetDownshift);

        // Models outside the chain are not offered during a downshift either
        let mut registry_only = qa_policy();
        registry_only.budget_fallback = None;
        let router = router_with(registry_only);
        spend(&router, 85.0);
        let outside = Requirements::default().with_override("llama3");
        assert_eq!(router.select_model("t1", "qa", &outside).unwrap().model.id, "gpt-4o-mini");

        let cheaper = Requirements::default().with_override("gpt-4o-mini");
        assert_eq!(
            router.select_model("t1", "qa", &cheaper).unwrap().reason,
            RouteReason::Override
        );
    }

    #[test]
    fn test_context_length_requirement() {
        let router = router_with(qa_policy());
        let requirements = Requirements::default().with_estimated_input_tokens(200_000);
        let err = router.select_model("t1", "qa", &requirements).unwrap_err();
        assert!(matches!(err, AppError::NoEligibleModel(_)));
    }

    #[test]
    fn test_select_and_reserve_holds_estimate() {
        let router = router_with(qa_policy());
        let (decision, reservation) = router
            .select_and_reserve("t1", "qa", &Requirements::default())
            .unwrap();

        let key = decision.budget_key();
        assert!((router.ledger().exposure(&key) - decision.estimated_cost).abs() < 1e-12);
        assert_eq!(router.ledger().spent(&key), 0.0);
        drop(reservation);
        assert_eq!(router.ledger().exposure(&key), 0.0);
    }
}
