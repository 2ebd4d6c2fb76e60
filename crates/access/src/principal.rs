//! Principals and resolved principal sets.
//!
//! A principal is an opaque token of the form `kind:id` or
//! `kind:provider/id`, where `kind` is `user`, `group` or `link`. Documents
//! carry the same tokens in their `allowed_principals`/`allowed_groups`
//! snapshots, so authorization is plain token intersection.

use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What a principal stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
    /// Organization-wide sharing link scope
    Link,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Link => "link",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// One access-control identity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal {
    token: String,
    kind: PrincipalKind,
}

impl Principal {
    fn build(kind: PrincipalKind, id: &str) -> Self {
        Self {
            token: format!("{}:{}", kind.as_str(), id),
            kind,
        }
    }

    pub fn user(id: impl AsRef<str>) -> Self {
        Self::build(PrincipalKind::User, id.as_ref())
    }

    pub fn group(id: impl AsRef<str>) -> Self {
        Self::build(PrincipalKind::Group, id.as_ref())
    }

    pub fn org_link(id: impl AsRef<str>) -> Self {
        Self::build(PrincipalKind::Link, id.as_ref())
    }

    /// Parse a `kind:id` token.
    pub fn parse(token: &str) -> AppResult<Self> {
        let token = token.trim();
        let (kind, id) = token
            .split_once(':')
            .ok_or_else(|| AppError::Other(format!("Principal token without kind: {:?}", token)))?;
        let kind = PrincipalKind::parse(kind)
            .ok_or_else(|| AppError::Other(format!("Unknown principal kind in {:?}", token)))?;
        if id.is_empty() {
            return Err(AppError::Other(format!("Empty principal id in {:?}", token)));
        }
        Ok(Self::build(kind, id))
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn is_org_link(&self) -> bool {
        self.kind == PrincipalKind::Link
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl TryFrom<String> for Principal {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.token
    }
}

/// Principals valid for one `(tenant, caller)` pair at a point in time.
///
/// Never mutated after creation; an expired set is replaced, not patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalSet {
    tenant: String,
    caller: String,
    principals: BTreeSet<Principal>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl PrincipalSet {
    pub fn new(
        tenant: impl Into<String>,
        caller: impl Into<String>,
        principals: impl IntoIterator<Item = Principal>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            caller: caller.into(),
            principals: principals.into_iter().collect(),
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    /// The fail-closed set: grants nothing and is already expired.
    pub fn empty(tenant: impl Into<String>, caller: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(tenant, caller, [], at, Duration::zero())
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn principals(&self) -> &BTreeSet<Principal> {
        &self.principals
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.principals.iter().any(|p| p.as_str() == token)
    }

    /// Whether any token in either ACL list belongs to this set.
    pub fn intersects(&self, allowed_principals: &[String], allowed_groups: &[String]) -> bool {
        allowed_principals
            .iter()
            .chain(allowed_groups)
            .any(|token| self.contains_token(token))
    }
}
