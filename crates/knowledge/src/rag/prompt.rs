//! Generation prompt rendering.
//!
//! Only allowed candidates ever reach [`build_context`]; the prompt never
//! learns that anything was withheld.

use bastion_access::CandidateDocument;
use bastion_core::{AppError, AppResult};
use handlebars::Handlebars;
use serde::Serialize;

const SYSTEM_TEMPLATE: &str = "\
You are a knowledge assistant answering questions from an organization's documents.

{{#if low_confidence}}
Note: The retrieved information may not directly answer this question. \
Be cautious and clear about what the documents do and do not state.

{{/if}}
Instructions:
- Answer only from the documents provided
- Cite every document you rely on with its [Document N] marker
- If the documents do not contain the answer, say so plainly
- Use markdown for readability
{{#if tables}}

When the data has a tabular shape, present it as a markdown table with a header row.
{{/if}}
{{#if charts}}

When the data is numeric, include it in a markdown table whose first column holds labels \
and whose remaining columns hold numbers, so it can be charted.
{{/if}}";

const USER_TEMPLATE: &str = "\
Question: {{question}}

Context Documents:
{{context}}

Answer the question from these documents. Always cite sources using [Document N].";

#[derive(Serialize)]
struct SystemVars {
    low_confidence: bool,
    tables: bool,
    charts: bool,
}

#[derive(Serialize)]
struct UserVars<'a> {
    question: &'a str,
    context: &'a str,
}

/// A rendered system/user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Renders the generation prompt from fixed templates.
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
}

impl PromptBuilder {
    pub fn new() -> AppResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string("system", SYSTEM_TEMPLATE)
            .map_err(|e| AppError::Knowledge(format!("Failed to register system template: {}", e)))?;
        handlebars
            .register_template_string("user", USER_TEMPLATE)
            .map_err(|e| AppError::Knowledge(format!("Failed to register user template: {}", e)))?;
        Ok(Self { handlebars })
    }

    pub fn render(
        &self,
        question: &str,
        context: &[CandidateDocument],
        low_confidence: bool,
        tables: bool,
        charts: bool,
    ) -> AppResult<RenderedPrompt> {
        let system = self
            .handlebars
            .render(
                "system",
                &SystemVars {
                    low_confidence,
                    tables,
                    charts,
                },
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to render system prompt: {}", e)))?;

        let context = build_context(context);
        let user = self
            .handlebars
            .render(
                "user",
                &UserVars {
                    question,
                    context: &context,
                },
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to render user prompt: {}", e)))?;

        Ok(RenderedPrompt {
            system: system.trim_end().to_string(),
            user,
        })
    }
}

/// Number the documents as `[Document N]` blocks, 1-based.
pub fn build_context(documents: &[CandidateDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[Document {}] {}\n{}", i + 1, doc.display_title(), doc.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
