//! Model descriptor types.
//!
//! A [`ModelDescriptor`] is tagged data: capabilities, performance classes,
//! cost and health are plain values evaluated by the router, not behavior
//! attached to a model type.

use bastion_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A feature a model may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Vision,
    ToolUse,
    FunctionCalling,
    Embeddings,
}

impl Capability {
    /// Parse a capability from its config spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "chat" => Some(Self::Chat),
            "vision" => Some(Self::Vision),
            "tool_use" | "tools" => Some(Self::ToolUse),
            "function_calling" | "functions" => Some(Self::FunctionCalling),
            "embeddings" | "embedding" => Some(Self::Embeddings),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Vision => "vision",
            Self::ToolUse => "tool_use",
            Self::FunctionCalling => "function_calling",
            Self::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency class; ordered fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    VeryLow,
    Low,
    Medium,
    High,
}

impl LatencyClass {
    /// Parse a latency class from its config spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "very_low" => Some(Self::VeryLow),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Whether a model of this class is at least as fast as `required`.
    pub fn meets(&self, required: LatencyClass) -> bool {
        *self <= required
    }
}

/// Output quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    Low,
    Medium,
    High,
}

/// Health as reported by the registry/health service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Only healthy models are routed to.
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Price per 1 000 input and output tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostPerUnit {
    pub input: f64,
    pub output: f64,
}

/// Provider-side rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(rename = "requestsPerMinute")]
    pub requests_per_minute: u32,

    #[serde(rename = "tokensPerMinute")]
    pub tokens_per_minute: u32,
}

/// Latency/quality/context characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub latency: LatencyClass,
    pub quality: QualityClass,

    #[serde(rename = "contextLength")]
    pub context_length: u32,
}

/// Provider API a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI-compatible chat completions (OpenAI, Azure OpenAI gateways)
    OpenAI,
    /// Local Ollama runtime
    Ollama,
}

impl ProviderType {
    /// Parse provider type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "azure-openai" | "azure_openai" => Some(Self::OpenAI),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Get the canonical provider name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
        }
    }
}

/// One entry in the model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Deployment identifier, also sent as the model name
    pub id: String,

    pub provider: ProviderType,

    /// Base URL of the provider API
    pub endpoint: String,

    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,

    pub performance: PerformanceProfile,

    #[serde(rename = "costPer1k")]
    pub cost: CostPerUnit,

    pub health: HealthStatus,

    #[serde(rename = "rateLimits")]
    pub rate_limits: RateLimits,
}

impl ModelDescriptor {
    /// Whether every required capability is supported.
    pub fn supports_all(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Prices must be finite and non-negative.
    pub fn validate(&self) -> AppResult<()> {
        let valid = |price: f64| price.is_finite() && price >= 0.0;
        if valid(self.cost.input) && valid(self.cost.output) {
            return Ok(());
        }
        Err(AppError::Config(format!(
            "Model {} has invalid cost per 1K tokens (input {}, output {})",
            self.id, self.cost.input, self.cost.output
        )))
    }

    /// Cost of a call with the given token counts.
    pub fn cost_for(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1000.0 * self.cost.input
            + f64::from(output_tokens) / 1000.0 * self.cost.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parsing() {
        assert_eq!(Capability::parse("tool-use"), Some(Capability::ToolUse));
        assert_eq!(Capability::parse("Vision"), Some(Capability::Vision));
        assert_eq!(
            Capability::parse("function_calling"),
            Some(Capability::FunctionCalling)
        );
        assert_eq!(Capability::parse("telepathy"), None);
    }

    #[test]
    fn test_latency_ordering() {
        assert!(LatencyClass::VeryLow.meets(LatencyClass::Low));
        assert!(LatencyClass::Low.meets(LatencyClass::Low));
        assert!(!LatencyClass::High.meets(LatencyClass::Medium));
    }

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!(ProviderType::parse("openai"), Some(ProviderType::OpenAI));
        assert_eq!(ProviderType::parse("azure-openai"), Some(ProviderType::OpenAI));
        assert_eq!(ProviderType::parse("ollama"), Some(ProviderType::Ollama));
        assert_eq!(ProviderType::parse("unknown"), None);
    }

    #[test]
    fn test_descriptor_deserialization_and_cost() {
        let json = serde_json::json!({
            "id": "gpt-4o",
            "provider": "openai",
            "endpoint": "https://llm.internal",
            "capabilities": ["chat", "tool_use"],
            "performance": {"latency": "medium", "quality": "high", "contextLength": 128000},
            "costPer1k": {"input": 0.005, "output": 0.015},
            "health": "healthy",
            "rateLimits": {"requestsPerMinute": 600, "tokensPerMinute": 150000}
        });

        let model: ModelDescriptor = serde_json::from_value(json).unwrap();
        assert!(model.capabilities.contains(&Capability::ToolUse));
        assert!(model.health.is_routable());

        let cost = model.cost_for(1000, 500);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_costs() {
        let json = serde_json::json!({
            "id": "free-lunch",
            "provider": "ollama",
            "endpoint": "http://localhost:11434",
            "performance": {"latency": "low", "quality": "low", "contextLength": 8192},
            "costPer1k": {"input": -0.5, "output": 0.0},
            "health": "healthy",
            "rateLimits": {"requestsPerMinute": 60, "tokensPerMinute": 10000}
        });
        let mut model: ModelDescriptor = serde_json::from_value(json).unwrap();
        assert!(matches!(model.validate(), Err(AppError::Config(_))));

        model.cost.input = 0.0;
        assert!(model.validate().is_ok());
        model.cost.output = f64::NAN;
        assert!(model.validate().is_err());
    }
}
