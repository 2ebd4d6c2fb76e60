//! Retrieval hits as seen by the access layer.

use serde::{Deserialize, Serialize};

/// One retrieval hit with the ACL snapshot stored at index time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDocument {
    pub id: String,

    #[serde(rename = "tenant_id")]
    pub tenant: String,

    #[serde(default)]
    pub title: Option<String>,

    /// Link back to the source item
    #[serde(default)]
    pub url: Option<String>,

    /// Content fragment used as generation context
    pub content: String,

    /// Relevance score in `0.0..=1.0`
    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub allowed_principals: Vec<String>,

    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

impl CandidateDocument {
    pub fn new(id: impl Into<String>, tenant: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            title: None,
            url: None,
            content: content.into(),
            score: 0.0,
            allowed_principals: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn allow_principal(mut self, token: impl Into<String>) -> Self {
        self.allowed_principals.push(token.into());
        self
    }

    pub fn allow_group(mut self, token: impl Into<String>) -> Self {
        self.allowed_groups.push(token.into());
        self
    }

    /// Title for display, falling back to the id.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}
