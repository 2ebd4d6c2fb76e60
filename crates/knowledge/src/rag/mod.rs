//! Answer generation: prompting, citations and structured output.
//!
//! Everything in here works on allowed candidates only.

pub mod assemble;
pub mod prompt;
pub mod structured;

pub use assemble::{
    assemble, extract_citations, select_context, AssembleOptions, CONFIDENCE_THRESHOLD,
    MIN_RELEVANCE_SCORE,
};
pub use prompt::{build_context, PromptBuilder, RenderedPrompt};
