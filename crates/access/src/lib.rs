//! Access control for retrieval.
//!
//! Resolves callers to principal sets, turns them into index filters, and
//! re-checks retrieved candidates at answer time:
//!
//! ```text
//! caller -> PrincipalResolver -> build_filter -> (index) -> final_gate
//! ```
//!
//! Every path that cannot establish the caller's principals ends in an empty
//! set, which grants nothing.

pub mod audit;
pub mod candidate;
pub mod filter;
pub mod gate;
pub mod identity;
pub mod principal;
pub mod resolver;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use candidate::CandidateDocument;
pub use filter::{build_filter, SecurityFilter};
pub use gate::{final_gate, final_gate_at, DenyReason, GateOutcome, SecurityDecision};
pub use identity::{
    HttpIdentityProvider, IdentityDirectory, IdentityProvider, StaticIdentityProvider,
    TenantIdentity,
};
pub use principal::{Principal, PrincipalKind, PrincipalSet};
pub use resolver::{PrincipalResolver, ResolverSettings};
