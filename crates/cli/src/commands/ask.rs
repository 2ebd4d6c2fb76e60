//! Ask command handler.
//!
//! Runs one question through the full pipeline as the given caller.

use crate::services;
use bastion_core::{config::AppConfig, AppResult};
use bastion_knowledge::{Answer, QueryRequest};
use clap::Args;

/// Ask a question as a given caller
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Tenant the caller belongs to
    #[arg(long, env = "BASTION_TENANT")]
    pub tenant: String,

    /// Caller identity (e.g., user principal name)
    #[arg(long, env = "BASTION_CALLER")]
    pub caller: String,

    /// Feature tag used for routing and budgets
    #[arg(long, default_value = "qa")]
    pub feature: String,

    /// Number of candidates to retrieve (1-50)
    #[arg(long, default_value_t = 8)]
    pub top_k: usize,

    /// Return tables found in the answer
    #[arg(long)]
    pub tables: bool,

    /// Return charts derived from numeric tables
    #[arg(long)]
    pub charts: bool,

    /// Preferred model; honored only if routing allows it
    #[arg(long)]
    pub model: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");

        let pipeline = services::build_pipeline(config).await?;
        let request = self.request();
        let answer = pipeline.respond(&request).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&answer)?);
        } else {
            print!("{}", render_text(&answer));
        }
        Ok(())
    }

    fn request(&self) -> QueryRequest {
        let mut request = QueryRequest::new(&self.tenant, &self.caller, &self.question)
            .with_feature(&self.feature)
            .with_top_k(self.top_k)
            .with_tables(self.tables)
            .with_charts(self.charts);
        request.model_override = self.model.clone();
        request
    }
}

fn render_text(answer: &Answer) -> String {
    let mut out = format!("{}\n", answer.text);

    if !answer.citations.is_empty() {
        out.push_str("\nSources:\n");
        for (i, citation) in answer.citations.iter().enumerate() {
            out.push_str(&format!(
                "  [{}] {} (relevance {:.2})\n",
                i + 1,
                citation.title,
                citation.relevance_score
            ));
            if let Some(url) = &citation.url {
                out.push_str(&format!("      {}\n", url));
            }
        }
    }

    for table in answer.tables.iter().flatten() {
        out.push_str(&format!("\n{}\n", table.title));
        out.push_str(&format!("  {}\n", table.headers.join(" | ")));
        for row in &table.rows {
            out.push_str(&format!("  {}\n", row.join(" | ")));
        }
    }

    for chart in answer.charts.iter().flatten() {
        let series: Vec<&str> = chart.series.iter().map(|s| s.name.as_str()).collect();
        out.push_str(&format!(
            "\nChart: {} ({:?}; {} over {} labels)\n",
            chart.title,
            chart.chart_type,
            series.join(", "),
            chart.labels.len()
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_knowledge::{Citation, TableData};
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        ask: AskCommand,
    }

    #[test]
    fn test_parse_builds_request() {
        let cli = TestCli::parse_from([
            "bastion", "Q3 revenue?", "--tenant", "t1", "--caller", "bob", "--top-k", "5", "--tables",
        ]);
        let request = cli.ask.request();
        assert_eq!(request.tenant, "t1");
        assert_eq!(request.caller, "bob");
        assert_eq!(request.feature, "qa");
        assert_eq!(request.top_k, 5);
        assert!(request.want_tables);
        assert!(!request.want_charts);
        assert!(request.model_override.is_none());
    }

    #[test]
    fn test_render_text() {
        let answer = Answer {
            text: "Revenue was 4.2M [Document 1].".to_string(),
            citations: vec![Citation {
                document_id: "d1".to_string(),
                title: "Q3 report".to_string(),
                url: Some("https://files.test/q3".to_string()),
                relevance_score: 0.9,
                excerpt: "Revenue was 4.2M".to_string(),
            }],
            tables: Some(vec![TableData {
                title: "Revenue".to_string(),
                headers: vec!["Quarter".to_string(), "Revenue".to_string()],
                rows: vec![vec!["Q3".to_string(), "4.2".to_string()]],
                source_documents: vec!["d1".to_string()],
            }]),
            charts: None,
            restricted: false,
            model: None,
        };

        let text = render_text(&answer);
        assert!(text.contains("[1] Q3 report (relevance 0.90)"));
        assert!(text.contains("https://files.test/q3"));
        assert!(text.contains("Quarter | Revenue"));
    }
}
