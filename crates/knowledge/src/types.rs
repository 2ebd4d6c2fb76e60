//! Query and answer types exposed to the conversational layer.

use bastion_core::{AppError, AppResult, USER_FACING_FAILURE};
use serde::{Deserialize, Serialize};

/// Largest `top_k` a caller may request.
pub const MAX_TOP_K: usize = 50;

/// Shown when some relevant content was withheld. Never carries counts.
pub const RESTRICTED_NOTICE: &str = "Some requested data is restricted for your account.";

/// One question from one caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub tenant: String,

    #[serde(rename = "callerIdentity")]
    pub caller: String,

    pub text: String,

    /// Feature tag used for routing and budgets (e.g., "qa", "summarize")
    #[serde(default = "default_feature")]
    pub feature: String,

    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,

    #[serde(rename = "wantTables", default)]
    pub want_tables: bool,

    #[serde(rename = "wantCharts", default)]
    pub want_charts: bool,

    /// Preferred model; honored only if routing allows it
    #[serde(rename = "modelOverride", default)]
    pub model_override: Option<String>,
}

fn default_feature() -> String {
    "qa".to_string()
}

fn default_top_k() -> usize {
    8
}

impl QueryRequest {
    pub fn new(tenant: impl Into<String>, caller: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            caller: caller.into(),
            text: text.into(),
            feature: default_feature(),
            top_k: default_top_k(),
            want_tables: false,
            want_charts: false,
            model_override: None,
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = feature.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_tables(mut self, want: bool) -> Self {
        self.want_tables = want;
        self
    }

    pub fn with_charts(mut self, want: bool) -> Self {
        self.want_charts = want;
        self
    }

    /// Reject requests that cannot be answered at all.
    pub fn validate(&self) -> AppResult<()> {
        let missing = [
            ("tenant", &self.tenant),
            ("caller", &self.caller),
            ("question", &self.text),
            ("feature", &self.feature),
        ];
        for (field, value) in missing {
            if value.trim().is_empty() {
                return Err(AppError::Knowledge(format!("Query {} must not be empty", field)));
            }
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(AppError::Knowledge(format!(
                "topK must be between 1 and {}, got {}",
                MAX_TOP_K, self.top_k
            )));
        }
        Ok(())
    }
}

/// A source the answer relied on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub relevance_score: f64,
    /// Short evidence snippet (truncated)
    pub excerpt: String,
}

/// A table recovered from the generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Ids of the allowed documents the table was built from
    pub source_documents: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<f64>,
}

/// A chart derived from a numeric table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub title: String,
    pub chart_type: ChartType,
    pub labels: Vec<String>,
    pub series: Vec<ChartSeries>,
    pub source_documents: Vec<String>,
}

/// The reply to one [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,

    pub citations: Vec<Citation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableData>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub charts: Option<Vec<ChartData>>,

    /// Some relevant content was withheld from this caller
    pub restricted: bool,

    /// Internal: model that generated the text
    #[serde(skip)]
    pub model: Option<String>,
}

impl Answer {
    /// Nothing the caller may see answers the question.
    pub fn no_information(restricted: bool) -> Self {
        let mut text =
            "I could not find information about this in the documents available to you.".to_string();
        if restricted {
            text.push_str("\n\n");
            text.push_str(RESTRICTED_NOTICE);
        }
        Self {
            text,
            citations: Vec::new(),
            tables: None,
            charts: None,
            restricted,
            model: None,
        }
    }

    /// The generic failure reply. Identical for every internal error.
    pub fn unavailable() -> Self {
        Self {
            text: USER_FACING_FAILURE.to_string(),
            citations: Vec::new(),
            tables: None,
            charts: None,
            restricted: false,
            model: None,
        }
    }
}
