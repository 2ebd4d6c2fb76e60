//! Response Assembler.
//!
//! Turns generated text plus the allowed context into an [`Answer`]. Denied
//! candidates only ever contribute one bit: whether to show the restricted
//! notice.

use crate::rag::structured::{derive_charts, extract_tables, strip_tables};
use crate::types::{Answer, Citation, RESTRICTED_NOTICE};
use bastion_access::CandidateDocument;

/// Candidates below this score are not used as context.
pub const MIN_RELEVANCE_SCORE: f64 = 0.20;

/// Below this top score the prompt asks the model to hedge.
pub const CONFIDENCE_THRESHOLD: f64 = 0.30;

/// Maximum excerpt length (characters) in a citation.
pub const MAX_EXCERPT_LENGTH: usize = 200;

/// Allowed candidates relevant enough to send to the model.
pub fn select_context(allowed: &[CandidateDocument]) -> Vec<CandidateDocument> {
    allowed
        .iter()
        .filter(|doc| doc.score >= MIN_RELEVANCE_SCORE)
        .cloned()
        .collect()
}

/// Whether the top context score is too weak to answer confidently.
pub fn is_low_confidence(context: &[CandidateDocument]) -> bool {
    context
        .iter()
        .map(|doc| doc.score)
        .fold(f64::NEG_INFINITY, f64::max)
        < CONFIDENCE_THRESHOLD
}

/// A denied candidate would have been used had the caller been allowed.
pub fn is_restricted(denied: &[CandidateDocument]) -> bool {
    denied.iter().any(|doc| doc.score >= MIN_RELEVANCE_SCORE)
}

/// Truncate to [`MAX_EXCERPT_LENGTH`] characters at a word boundary.
pub fn excerpt(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() <= MAX_EXCERPT_LENGTH {
        return content.to_string();
    }
    let cut = content
        .char_indices()
        .nth(MAX_EXCERPT_LENGTH)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let head = &content[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    format!("{}...", head.trim_end())
}

/// 1-based `[Document N]` markers in order of first appearance.
fn cited_indices(text: &str) -> Vec<usize> {
    const MARKER: &str = "[Document ";
    let mut indices = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(MARKER) {
        rest = &rest[pos + MARKER.len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if rest[digits.len()..].starts_with(']') {
            if let Ok(n) = digits.parse::<usize>() {
                if !indices.contains(&n) {
                    indices.push(n);
                }
            }
        }
    }
    indices
}

fn citation(doc: &CandidateDocument) -> Citation {
    Citation {
        document_id: doc.id.clone(),
        title: doc.display_title().to_string(),
        url: doc.url.clone(),
        relevance_score: doc.score,
        excerpt: excerpt(&doc.content),
    }
}

/// Citations for the context documents the text refers to.
///
/// Markers outside the context range are ignored. Text without any valid
/// marker cites every context document.
pub fn extract_citations(text: &str, context: &[CandidateDocument]) -> Vec<Citation> {
    let cited: Vec<Citation> = cited_indices(text)
        .into_iter()
        .filter_map(|n| n.checked_sub(1).and_then(|i| context.get(i)))
        .map(citation)
        .collect();
    if cited.is_empty() {
        context.iter().map(citation).collect()
    } else {
        cited
    }
}

/// What the caller asked to get back besides text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    pub want_tables: bool,
    pub want_charts: bool,
    pub restricted: bool,
}

/// Build the caller-facing answer.
pub fn assemble(generated: &str, context: &[CandidateDocument], options: AssembleOptions) -> Answer {
    let citations = extract_citations(generated, context);
    let sources: Vec<String> = citations.iter().map(|c| c.document_id.clone()).collect();

    let tables = if options.want_tables || options.want_charts {
        extract_tables(generated, &sources)
    } else {
        Vec::new()
    };
    let charts = if options.want_charts {
        derive_charts(&tables)
    } else {
        Vec::new()
    };

    let mut text = if options.want_tables && !tables.is_empty() {
        strip_tables(generated)
    } else {
        generated.trim().to_string()
    };
    if options.restricted {
        text.push_str("\n\n");
        text.push_str(RESTRICTED_NOTICE);
    }

    Answer {
        text,
        citations,
        tables: (options.want_tables && !tables.is_empty()).then_some(tables),
        charts: (!charts.is_empty()).then_some(charts),
        restricted: options.restricted,
        model: None,
    }
}
