//! Search index backends.
//!
//! The index is an external service that evaluates the security filter
//! itself; this module only knows how to ask it. [`MemoryIndex`] evaluates
//! the same filter locally and backs tests and offline use.

use bastion_access::{CandidateDocument, SecurityFilter};
use bastion_core::{AppError, AppResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One query against the index.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub tenant: &'a str,
    pub query: &'a str,
    pub filter: &'a SecurityFilter,
    pub top_k: usize,
}

/// A searchable, filter-aware document index.
#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Return at most `top_k` hits that satisfy the filter.
    async fn search(&self, request: &SearchRequest<'_>) -> AppResult<Vec<CandidateDocument>>;
}

/// Semantic search service reached over HTTP.
///
/// `POST {endpoint}/indexes/{index}/docs/search` with the filter expression
/// passed through untouched. Queries are hybrid: keyword and semantic
/// ranking plus a vector query the service vectorizes from the same text.
pub struct HttpSearchIndex {
    endpoint: String,
    index_name: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSearchIndex {
    pub fn new(
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build search HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            api_key: None,
            client,
        })
    }

    /// Send `api-key` with every request.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

const VECTOR_FIELD: &str = "content_vector";

fn search_body(request: &SearchRequest<'_>) -> serde_json::Value {
    serde_json::json!({
        "search": request.query,
        "filter": request.filter.expression(),
        "top": request.top_k,
        "queryType": "semantic",
        "semanticConfiguration": "default",
        "vectorQueries": [{
            "kind": "text",
            "text": request.query,
            "fields": VECTOR_FIELD,
            "k": request.top_k,
        }],
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(flatten)]
    document: CandidateDocument,

    #[serde(rename = "@search.score", default)]
    search_score: Option<f64>,

    #[serde(rename = "@search.rerankerScore", default)]
    reranker_score: Option<f64>,
}

impl SearchHit {
    /// Reranker scores run 0..4; raw scores are clamped into 0..1.
    fn into_candidate(self) -> CandidateDocument {
        let score = match (self.reranker_score, self.search_score) {
            (Some(reranked), _) => reranked / 4.0,
            (None, Some(raw)) => raw,
            (None, None) => self.document.score,
        };
        let mut document = self.document;
        document.score = score.clamp(0.0, 1.0);
        document
    }
}

#[async_trait::async_trait]
impl SearchIndex for HttpSearchIndex {
    fn name(&self) -> &str {
        &self.index_name
    }

    async fn search(&self, request: &SearchRequest<'_>) -> AppResult<Vec<CandidateDocument>> {
        let url = format!("{}/indexes/{}/docs/search", self.endpoint, self.index_name);
        let body = search_body(request);

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.header("api-key", key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable(format!("Failed to reach search index: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::RetrievalUnavailable(format!(
                "Search index returned {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::RetrievalUnavailable(format!("Failed to parse search response: {}", e)))?;

        Ok(parsed.value.into_iter().map(SearchHit::into_candidate).collect())
    }
}

/// In-process index over a fixed document set.
///
/// Applies the security filter locally and scores documents by the share of
/// query terms they contain.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    documents: Vec<CandidateDocument>,
}

impl MemoryIndex {
    pub fn new(documents: Vec<CandidateDocument>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of documents.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read documents file {:?}: {}", path, e))
        })?;
        let documents: Vec<CandidateDocument> = serde_json::from_str(&contents)?;
        tracing::info!("Loaded {} documents from {:?}", documents.len(), path);
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait::async_trait]
impl SearchIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, request: &SearchRequest<'_>) -> AppResult<Vec<CandidateDocument>> {
        let query_terms = terms(request.query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<CandidateDocument> = self
            .documents
            .iter()
            .filter(|doc| request.filter.matches(doc))
            .filter_map(|doc| {
                let mut haystack = terms(&doc.content);
                if let Some(title) = &doc.title {
                    haystack.extend(terms(title));
                }
                let matched = query_terms.iter().filter(|t| haystack.contains(*t)).count();
                if matched == 0 {
                    return None;
                }
                let mut hit = doc.clone();
                hit.score = matched as f64 / query_terms.len() as f64;
                Some(hit)
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(request.top_k);
        Ok(hits)
    }
}
