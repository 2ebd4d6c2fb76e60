//! Models command handler.

use crate::services;
use bastion_core::{config::AppConfig, AppResult};
use bastion_llm::ModelDescriptor;
use clap::Args;

/// List the model registry
#[derive(Args, Debug)]
pub struct ModelsCommand {
    /// Only show routable models
    #[arg(long)]
    pub healthy: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ModelsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let router = services::load_live_router(config).await?;
        let models = if self.healthy {
            router.registry().healthy()
        } else {
            router.registry().all()
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&models)?);
            return Ok(());
        }

        if models.is_empty() {
            println!("No models registered");
            return Ok(());
        }
        for model in &models {
            println!("{}", describe(model));
        }
        Ok(())
    }
}

fn describe(model: &ModelDescriptor) -> String {
    let capabilities: Vec<&str> = model.capabilities.iter().map(|c| c.as_str()).collect();
    format!(
        "{:<24} {:<8} {:<10} latency={:?} quality={:?} ctx={} cost/1K in={} out={} [{}]",
        model.id,
        model.provider.as_str(),
        format!("{:?}", model.health).to_lowercase(),
        model.performance.latency,
        model.performance.quality,
        model.performance.context_length,
        model.cost.input,
        model.cost.output,
        capabilities.join(",")
    )
}
