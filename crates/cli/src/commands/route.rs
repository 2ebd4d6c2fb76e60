//! Route command handler.
//!
//! Shows the routing decision for a (tenant, feature) without generating.

use crate::services;
use bastion_core::{config::AppConfig, AppResult};
use bastion_llm::{Capability, LatencyClass, Requirements};
use clap::Args;

/// Show which model a request would be routed to
#[derive(Args, Debug)]
pub struct RouteCommand {
    #[arg(long)]
    pub tenant: String,

    #[arg(long, default_value = "qa")]
    pub feature: String,

    /// Required capability (repeatable): chat, vision, tool_use, function_calling, embeddings
    #[arg(long = "capability", value_parser = parse_capability)]
    pub capabilities: Vec<Capability>,

    /// Slowest acceptable latency class: very_low, low, medium, high
    #[arg(long, value_parser = parse_latency)]
    pub max_latency: Option<LatencyClass>,

    /// Estimated prompt size in tokens
    #[arg(long)]
    pub context_tokens: Option<u32>,

    /// Preferred model
    #[arg(long)]
    pub model: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    Capability::parse(s).ok_or_else(|| format!("unknown capability '{}'", s))
}

fn parse_latency(s: &str) -> Result<LatencyClass, String> {
    LatencyClass::parse(s).ok_or_else(|| format!("unknown latency class '{}'", s))
}

impl RouteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing route command");

        let router = services::load_live_router(config).await?;
        let decision = router.select_model(&self.tenant, &self.feature, &self.requirements())?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&decision)?);
        } else {
            println!("model:          {}", decision.model.id);
            println!("provider:       {}", decision.model.provider.as_str());
            println!("reason:         {:?}", decision.reason);
            println!("estimated cost: {:.5}", decision.estimated_cost);
            println!("period:         {} (ceiling {:.2})", decision.period, decision.ceiling);
        }
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        let mut requirements = Requirements::default();
        for capability in &self.capabilities {
            requirements = requirements.with_capability(*capability);
        }
        if let Some(latency) = self.max_latency {
            requirements = requirements.with_max_latency(latency);
        }
        if let Some(tokens) = self.context_tokens {
            requirements = requirements.with_estimated_input_tokens(tokens);
        }
        if let Some(model) = &self.model {
            requirements = requirements.with_override(model.clone());
        }
        requirements
    }
}
