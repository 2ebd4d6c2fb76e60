//! Retrieval Gateway.
//!
//! Sends one filtered query to the index and normalizes what comes back.
//! The gateway never widens the filter and never retries; retries belong to
//! the pipeline, which owns the deadline.

use crate::index::{SearchIndex, SearchRequest};
use crate::types::MAX_TOP_K;
use bastion_access::{CandidateDocument, SecurityFilter};
use bastion_core::{AppError, AppResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct RetrievalGateway {
    index: Arc<dyn SearchIndex>,
}

impl RetrievalGateway {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Query the index under `filter`.
    ///
    /// Returns candidates sorted by descending score, at most `top_k` of
    /// them, all belonging to `tenant`. A deny-all filter short-circuits to
    /// an empty result. Index failures surface as `RetrievalUnavailable`.
    pub async fn retrieve(
        &self,
        tenant: &str,
        query: &str,
        filter: &SecurityFilter,
        top_k: usize,
    ) -> AppResult<Vec<CandidateDocument>> {
        if filter.tenant() != tenant {
            tracing::warn!("Refusing retrieval: filter tenant does not match request tenant");
            return Ok(Vec::new());
        }
        if filter.is_deny_all() {
            tracing::debug!("Deny-all filter, skipping index call");
            return Ok(Vec::new());
        }

        let top_k = top_k.clamp(1, MAX_TOP_K);
        let request = SearchRequest {
            tenant,
            query,
            filter,
            top_k,
        };

        let mut hits = self.index.search(&request).await.map_err(|e| match e {
            AppError::RetrievalUnavailable(_) => e,
            other => AppError::RetrievalUnavailable(other.to_string()),
        })?;

        let before = hits.len();
        hits.retain(|hit| hit.tenant == tenant);
        if hits.len() != before {
            tracing::warn!(
                "Index {} returned {} cross-tenant hits; dropped",
                self.index.name(),
                before - hits.len()
            );
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        tracing::debug!("Retrieved {} candidates from {}", hits.len(), self.index.name());
        Ok(hits)
    }
}
