//! Security-trimmed retrieval and answering.
//!
//! Ties the access layer and the model router into one query pipeline:
//! resolve the caller, filter the index, re-check every hit, route a model
//! and assemble an answer from what the caller may see.
//!
//! # Example
//! ```no_run
//! use bastion_knowledge::{QueryPipeline, QueryRequest};
//!
//! # async fn example(pipeline: QueryPipeline) {
//! let request = QueryRequest::new("contoso", "bob@contoso.com", "What was Q3 revenue?");
//! let answer = pipeline.respond(&request).await;
//! println!("{}", answer.text);
//! # }
//! ```

pub mod index;
pub mod pipeline;
pub mod rag;
pub mod retrieval;
pub mod retry;
pub mod types;

pub use index::{HttpSearchIndex, MemoryIndex, SearchIndex, SearchRequest};
pub use pipeline::{FailureReason, QueryPipeline, QueryStage, QueryTrace, StageTimeouts};
pub use retrieval::RetrievalGateway;
pub use retry::RetryPolicy;
pub use types::{
    Answer, ChartData, ChartSeries, ChartType, Citation, QueryRequest, TableData,
    RESTRICTED_NOTICE,
};
