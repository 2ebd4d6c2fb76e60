//! Security Filter Builder.
//!
//! Serializes a principal set into the index's predicate language
//! ("the document's allowed set intersects the caller's principals"). The
//! same predicate can be evaluated locally through [`SecurityFilter::permits`].

use crate::candidate::CandidateDocument;
use crate::principal::PrincipalSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Token separator inside `search.in(...)`.
pub const TOKEN_DELIMITER: char = '|';

/// Expression that matches no document.
pub const DENY_ALL: &str = "false";

/// A stateless predicate derived from one principal set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SecurityFilter {
    tenant: String,
    tokens: Vec<String>,
    expression: String,
}

/// Build the filter for `principals`.
///
/// Deterministic: tokens are sorted and deduplicated, so the same set always
/// yields the same expression. An empty set yields the deny-all filter.
pub fn build_filter(principals: &PrincipalSet) -> SecurityFilter {
    let tokens: Vec<String> = principals
        .principals()
        .iter()
        .map(|p| p.as_str())
        .filter(|token| {
            let usable = !token.contains(TOKEN_DELIMITER);
            if !usable {
                tracing::warn!("Dropping principal containing the filter delimiter");
            }
            usable
        })
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let expression = if tokens.is_empty() {
        DENY_ALL.to_string()
    } else {
        let joined = escape(&tokens.join(&TOKEN_DELIMITER.to_string()));
        format!(
            "tenant_id eq '{tenant}' and (allowed_principals/any(p: search.in(p, '{joined}', '{d}')) \
             or allowed_groups/any(g: search.in(g, '{joined}', '{d}')))",
            tenant = escape(principals.tenant()),
            joined = joined,
            d = TOKEN_DELIMITER,
        )
    };

    SecurityFilter {
        tenant: principals.tenant().to_string(),
        tokens,
        expression,
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

impl SecurityFilter {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Predicate in the index's filter syntax.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_deny_all(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Local evaluation of the ACL half of the predicate.
    pub fn permits(&self, allowed_principals: &[String], allowed_groups: &[String]) -> bool {
        allowed_principals
            .iter()
            .chain(allowed_groups)
            .any(|token| self.tokens.binary_search(token).is_ok())
    }

    /// Local evaluation of the whole predicate, tenant included.
    pub fn matches(&self, document: &CandidateDocument) -> bool {
        document.tenant == self.tenant
            && self.permits(&document.allowed_principals, &document.allowed_groups)
    }

    /// SHA-256 of the expression, for audit logs that must not carry tokens.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(self.expression.as_bytes()))
    }
}

impl fmt::Display for SecurityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
