//! SecurityDecision stream.

use crate::gate::SecurityDecision;
use bastion_core::logging::AUDIT_TARGET;
use std::sync::Mutex;

/// Destination for security decisions (audit collector).
pub trait AuditSink: Send + Sync {
    fn record(&self, decision: &SecurityDecision);

    fn record_all(&self, decisions: &[SecurityDecision]) {
        for decision in decisions {
            self.record(decision);
        }
    }
}

/// Logs decisions on the audit target. Denials at info, grants at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, decision: &SecurityDecision) {
        let reason = decision.reason.map(|r| r.code()).unwrap_or("granted");
        if decision.allowed {
            tracing::debug!(
                target: AUDIT_TARGET,
                tenant = %decision.tenant,
                caller = %decision.caller,
                candidate = %decision.candidate_id,
                allowed = true,
                reason,
                timestamp = %decision.timestamp,
                "security decision"
            );
        } else {
            tracing::info!(
                target: AUDIT_TARGET,
                tenant = %decision.tenant,
                caller = %decision.caller,
                candidate = %decision.candidate_id,
                allowed = false,
                reason,
                timestamp = %decision.timestamp,
                "security decision"
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    decisions: Mutex<Vec<SecurityDecision>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<SecurityDecision> {
        match self.decisions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, decision: &SecurityDecision) {
        let mut decisions = match self.decisions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        decisions.push(decision.clone());
    }
}
