//! Final Gate.
//!
//! Re-checks every retrieved candidate against the caller's current
//! principal set. Pure and in-process: no I/O per candidate.

use crate::candidate::CandidateDocument;
use crate::principal::PrincipalSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a candidate was withheld. Internal only; never shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    TenantMismatch,
    NoMatchingPrincipal,
    EmptyPrincipalSet,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TenantMismatch => "tenant_mismatch",
            Self::NoMatchingPrincipal => "no_matching_principal",
            Self::EmptyPrincipalSet => "empty_principal_set",
        }
    }
}

/// One audit fact per candidate. Never carries document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityDecision {
    pub tenant: String,
    pub caller: String,
    pub candidate_id: String,
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub timestamp: DateTime<Utc>,
}

/// Result of gating a candidate list.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    pub allowed: Vec<CandidateDocument>,
    pub denied: Vec<CandidateDocument>,
    pub decisions: Vec<SecurityDecision>,
}

impl GateOutcome {
    /// Whether the gate withheld anything.
    pub fn is_partial(&self) -> bool {
        !self.denied.is_empty() && !self.allowed.is_empty()
    }
}

fn verdict(candidate: &CandidateDocument, principals: &PrincipalSet) -> Option<DenyReason> {
    if principals.is_empty() {
        Some(DenyReason::EmptyPrincipalSet)
    } else if candidate.tenant != principals.tenant() {
        Some(DenyReason::TenantMismatch)
    } else if !principals.intersects(&candidate.allowed_principals, &candidate.allowed_groups) {
        Some(DenyReason::NoMatchingPrincipal)
    } else {
        None
    }
}

/// Split `candidates` into allowed and denied, preserving order.
pub fn final_gate(candidates: Vec<CandidateDocument>, principals: &PrincipalSet) -> GateOutcome {
    final_gate_at(candidates, principals, Utc::now())
}

/// [`final_gate`] with an explicit decision timestamp.
pub fn final_gate_at(
    candidates: Vec<CandidateDocument>,
    principals: &PrincipalSet,
    at: DateTime<Utc>,
) -> GateOutcome {
    let mut outcome = GateOutcome::default();

    for candidate in candidates {
        let reason = verdict(&candidate, principals);
        outcome.decisions.push(SecurityDecision {
            tenant: principals.tenant().to_string(),
            caller: principals.caller().to_string(),
            candidate_id: candidate.id.clone(),
            allowed: reason.is_none(),
            reason,
            timestamp: at,
        });

        match reason {
            None => outcome.allowed.push(candidate),
            Some(_) => outcome.denied.push(candidate),
        }
    }

    outcome
}
