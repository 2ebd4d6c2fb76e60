//! Usage records and metering.
//!
//! Every generation call that actually ran produces one immutable
//! [`UsageRecord`]. The meter prices it, settles the budget reservation taken
//! at routing time and appends the record to the usage stream.

use crate::budget::Reservation;
use crate::client::LlmUsage;
use crate::routing::RouteDecision;
use bastion_core::logging::USAGE_TARGET;
use bastion_core::{AppResult, Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Append-only fact: which model served which request, and what it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: Uuid,
    pub tenant: String,
    pub feature: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub period: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination of the usage stream (billing collector).
pub trait UsageSink: Send + Sync {
    fn emit(&self, record: &UsageRecord);
}

/// Writes each record as a structured event on the usage log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn emit(&self, record: &UsageRecord) {
        tracing::info!(
            target: USAGE_TARGET,
            request_id = %record.request_id,
            tenant = %record.tenant,
            feature = %record.feature,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost = record.cost,
            period = %record.period,
            "usage"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records emitted so far.
    pub fn records(&self) -> Vec<UsageRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl UsageSink for MemoryUsageSink {
    fn emit(&self, record: &UsageRecord) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(record.clone());
    }
}

/// Prices generation calls and settles them against the budget.
#[derive(Clone)]
pub struct UsageMeter {
    sink: Arc<dyn UsageSink>,
    clock: Arc<dyn Clock>,
}

impl UsageMeter {
    pub fn new(sink: Arc<dyn UsageSink>) -> Self {
        Self {
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record a completed generation call.
    ///
    /// The cost comes from the routed model's prices and the reported token
    /// counts; the reservation is settled with it before the record is emitted.
    pub fn record(
        &self,
        request_id: Uuid,
        decision: &RouteDecision,
        reservation: Reservation,
        usage: LlmUsage,
    ) -> AppResult<UsageRecord> {
        let cost = decision
            .model
            .cost_for(usage.prompt_tokens, usage.completion_tokens);
        let total = reservation.settle(cost)?;

        let record = UsageRecord {
            request_id,
            tenant: decision.tenant.clone(),
            feature: decision.feature.clone(),
            model: decision.model.id.clone(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost,
            period: decision.period.to_string(),
            timestamp: self.clock.now(),
        };

        tracing::debug!(
            "Settled {:.5} for {}/{} (period total {:.5})",
            cost,
            record.tenant,
            record.feature,
            total
        );
        self.sink.emit(&record);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLedger;
    use crate::registry::tests::model;
    use crate::registry::ModelRegistry;
    use crate::routing::{BudgetConstraints, ModelRouter, PolicyTable, Requirements, RoutingPolicy};
    use crate::types::Capability;

    #[test]
    fn test_record_settles_budget_and_emits() {
        let registry = ModelRegistry::from_models(vec![model("gpt-4o", &[Capability::Chat], 0.005, 0.015)]);
        let policy = RoutingPolicy {
            tenant: "t1".to_string(),
            feature: "qa".to_string(),
            primary: "gpt-4o".to_string(),
            fallback: None,
            budget_fallback: None,
            budget: BudgetConstraints {
                period_budget: 10.0,
                cost_threshold: 0.8,
                automatic_downshift: true,
            },
            quality_priority: true,
        };
        let ledger = BudgetLedger::new();
        let router = ModelRouter::new(registry, PolicyTable::from_policies(vec![policy]), ledger.clone());

        let sink = Arc::new(MemoryUsageSink::new());
        let meter = UsageMeter::new(sink.clone());

        let (decision, reservation) = router
            .select_and_reserve("t1", "qa", &Requirements::default())
            .unwrap();
        let record = meter
            .record(Uuid::new_v4(), &decision, reservation, LlmUsage::new(2000, 1000))
            .unwrap();

        assert!((record.cost - 0.025).abs() < 1e-9);
        assert_eq!(record.model, "gpt-4o");
        assert!((ledger.spent(&decision.budget_key()) - 0.025).abs() < 1e-9);
        assert!((ledger.exposure(&decision.budget_key()) - 0.025).abs() < 1e-9);
        assert_eq!(sink.records(), vec![record]);
    }
}
