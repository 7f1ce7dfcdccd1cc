//! Typed node configs.
//!
//! Each node type carries a schema-checked config.  [`NodeConfig::parse`]
//! is the single entry point, used both at node-creation time (rejecting
//! bad configs with HTTP 400) and again from the `config_snapshot` at
//! dispatch time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NodeError;

/// Models accepted by the `generative_ai` node and the agent planner.
pub const SUPPORTED_MODELS: &[&str] = &["gpt-4.1-mini", "gpt-4o", "gpt-5"];

/// Upper bound on `generative_ai` prompt templates.
pub const MAX_PROMPT_CHARS: usize = 4000;

/// Default completion budget when the config does not set `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// The four supported node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    ExtractText,
    GenerativeAi,
    Formatter,
    Agent,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractText => "extract_text",
            Self::GenerativeAi => "generative_ai",
            Self::Formatter => "formatter",
            Self::Agent => "agent",
        }
    }

    /// Whether re-running the node with identical inputs is guaranteed to
    /// reproduce the same output.  LLM-backed nodes are not.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::ExtractText | Self::Formatter)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract_text" => Ok(Self::ExtractText),
            "generative_ai" => Ok(Self::GenerativeAi),
            "formatter" => Ok(Self::Formatter),
            "agent" => Ok(Self::Agent),
            other => Err(format!(
                "unsupported node type '{other}'; expected one of: extract_text, generative_ai, formatter, agent"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-type configs
// ---------------------------------------------------------------------------

/// `extract_text`: read a previously uploaded PDF and return its text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTextConfig {
    pub file_id: Uuid,
}

/// `generative_ai`: substitute the input into a prompt template and call
/// the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeAiConfig {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl GenerativeAiConfig {
    fn validate(&self) -> Result<(), NodeError> {
        if !SUPPORTED_MODELS.contains(&self.model.as_str()) {
            return Err(NodeError::Validation(format!(
                "Unsupported model: {}. Supported models: {}",
                self.model,
                SUPPORTED_MODELS.join(", ")
            )));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(NodeError::Validation(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(NodeError::Validation(
                    "temperature must be a number between 0.0 and 2.0".into(),
                ));
            }
        }
        if let Some(m) = self.max_tokens {
            if !(1..=4096).contains(&m) {
                return Err(NodeError::Validation(
                    "max_tokens must be an integer between 1 and 4096".into(),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(NodeError::Validation(
                    "top_p must be a number between 0.0 and 1.0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A single formatter rule.  Rules are applied in listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatRule {
    Lowercase,
    Uppercase,
    FullToHalf,
    HalfToFull,
}

impl std::str::FromStr for FormatRule {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowercase" => Ok(Self::Lowercase),
            "uppercase" => Ok(Self::Uppercase),
            "full_to_half" => Ok(Self::FullToHalf),
            "half_to_full" => Ok(Self::HalfToFull),
            other => Err(format!(
                "Unsupported rule: '{other}'. Supported rules: lowercase, uppercase, full_to_half, half_to_full"
            )),
        }
    }
}

/// `formatter`: apply text transformation rules in order.  An empty rule
/// list is a valid no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatterConfig {
    pub rules: Vec<FormatRule>,
}

/// Tools an agent may be allowed to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTool {
    LlmCall,
    Formatter,
}

impl AgentTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmCall => "llm_call",
            Self::Formatter => "formatter",
        }
    }
}

/// Hard budgets for one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBudgets {
    /// Overall wall-clock budget in seconds.
    pub execution_time: f64,
}

/// `agent`: bounded plan/act/observe loop (see the `agent` module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub objective: String,
    pub tools: Vec<AgentTool>,
    pub budgets: AgentBudgets,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatting_rules: Option<Vec<FormatRule>>,
}

impl AgentConfig {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
    pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_MAX_CONCURRENT: u32 = 1;

    fn validate(&self) -> Result<(), NodeError> {
        if self.objective.trim().is_empty() {
            return Err(NodeError::Validation(
                "Agent config missing required field: objective".into(),
            ));
        }
        if self.tools.is_empty() {
            return Err(NodeError::Validation(
                "Agent tools must be a non-empty list".into(),
            ));
        }
        if !self.budgets.execution_time.is_finite()
            || self.budgets.execution_time <= 0.0
            || self.budgets.execution_time > 86_400.0
        {
            return Err(NodeError::Validation(
                "budgets.execution_time must be a positive number of seconds (at most 86400)"
                    .into(),
            ));
        }
        if let Some(c) = self.max_concurrent {
            if !(1..=10).contains(&c) {
                return Err(NodeError::Validation(
                    "max_concurrent must be an integer between 1 and 10".into(),
                ));
            }
        }
        if let Some(t) = self.timeout_seconds {
            if t <= 0.0 || t > 30.0 {
                return Err(NodeError::Validation(
                    "timeout_seconds must be a number between 0 and 30".into(),
                ));
            }
        }
        if let Some(r) = self.max_retries {
            if r > 3 {
                return Err(NodeError::Validation(
                    "max_retries must be an integer between 0 and 3".into(),
                ));
            }
        }
        if let Some(i) = self.max_iterations {
            if i == 0 {
                return Err(NodeError::Validation(
                    "max_iterations must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(Self::DEFAULT_MAX_ITERATIONS)
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds.unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(Self::DEFAULT_MAX_CONCURRENT) as usize
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// A node's config, discriminated by its type.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    ExtractText(ExtractTextConfig),
    GenerativeAi(GenerativeAiConfig),
    Formatter(FormatterConfig),
    Agent(AgentConfig),
}

impl NodeConfig {
    /// Deserialize and semantically validate a raw config against the
    /// schema of `node_type`.
    pub fn parse(node_type: NodeType, config: &serde_json::Value) -> Result<Self, NodeError> {
        let invalid = |e: serde_json::Error| {
            NodeError::Validation(format!("invalid {node_type} config: {e}"))
        };
        match node_type {
            NodeType::ExtractText => {
                let c: ExtractTextConfig =
                    serde_json::from_value(config.clone()).map_err(invalid)?;
                Ok(Self::ExtractText(c))
            }
            NodeType::GenerativeAi => {
                let c: GenerativeAiConfig =
                    serde_json::from_value(config.clone()).map_err(invalid)?;
                c.validate()?;
                Ok(Self::GenerativeAi(c))
            }
            NodeType::Formatter => {
                let c: FormatterConfig =
                    serde_json::from_value(config.clone()).map_err(invalid)?;
                Ok(Self::Formatter(c))
            }
            NodeType::Agent => {
                let c: AgentConfig = serde_json::from_value(config.clone()).map_err(invalid)?;
                c.validate()?;
                Ok(Self::Agent(c))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_type_round_trips_through_str() {
        for (s, t) in [
            ("extract_text", NodeType::ExtractText),
            ("generative_ai", NodeType::GenerativeAi),
            ("formatter", NodeType::Formatter),
            ("agent", NodeType::Agent),
        ] {
            assert_eq!(s.parse::<NodeType>().unwrap(), t);
            assert_eq!(t.as_str(), s);
        }
        assert!("webhook".parse::<NodeType>().is_err());
    }

    #[test]
    fn generative_config_accepts_supported_models() {
        for model in ["gpt-4.1-mini", "gpt-4o", "gpt-5"] {
            let cfg = json!({ "model": model, "prompt": "Summarize: {text}" });
            assert!(NodeConfig::parse(NodeType::GenerativeAi, &cfg).is_ok());
        }
    }

    #[test]
    fn generative_config_rejects_unknown_model() {
        let cfg = json!({ "model": "gpt-3.5-turbo", "prompt": "{text}" });
        let err = NodeConfig::parse(NodeType::GenerativeAi, &cfg).unwrap_err();
        assert!(matches!(err, NodeError::Validation(msg) if msg.contains("Unsupported model")));
    }

    #[test]
    fn generative_config_rejects_oversized_prompt() {
        let cfg = json!({ "model": "gpt-4o", "prompt": "x".repeat(4001) });
        assert!(NodeConfig::parse(NodeType::GenerativeAi, &cfg).is_err());
    }

    #[test]
    fn generative_config_rejects_out_of_range_sampling_params() {
        for cfg in [
            json!({ "model": "gpt-4o", "prompt": "p", "temperature": 2.5 }),
            json!({ "model": "gpt-4o", "prompt": "p", "max_tokens": 0 }),
            json!({ "model": "gpt-4o", "prompt": "p", "max_tokens": 5000 }),
            json!({ "model": "gpt-4o", "prompt": "p", "top_p": 1.5 }),
        ] {
            assert!(NodeConfig::parse(NodeType::GenerativeAi, &cfg).is_err());
        }
    }

    #[test]
    fn formatter_config_rejects_unknown_rule() {
        let cfg = json!({ "rules": ["lowercase", "rot13"] });
        let err = NodeConfig::parse(NodeType::Formatter, &cfg).unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[test]
    fn formatter_config_allows_empty_rules() {
        let cfg = json!({ "rules": [] });
        assert!(NodeConfig::parse(NodeType::Formatter, &cfg).is_ok());
    }

    #[test]
    fn agent_config_defaults_and_limits() {
        let cfg = json!({
            "objective": "condense the report",
            "tools": ["llm_call", "formatter"],
            "budgets": { "execution_time": 20 }
        });
        let NodeConfig::Agent(agent) = NodeConfig::parse(NodeType::Agent, &cfg).unwrap() else {
            panic!("expected agent config");
        };
        assert_eq!(agent.max_iterations(), 3);
        assert_eq!(agent.max_retries(), 3);
        assert_eq!(agent.max_concurrent(), 1);
        assert_eq!(agent.timeout_seconds(), 30.0);
    }

    #[test]
    fn agent_config_rejects_unknown_tool() {
        let cfg = json!({
            "objective": "extract",
            "tools": ["pdf_extract"],
            "budgets": { "execution_time": 5 }
        });
        assert!(NodeConfig::parse(NodeType::Agent, &cfg).is_err());
    }

    #[test]
    fn agent_config_rejects_out_of_policy_limits() {
        for cfg in [
            json!({ "objective": "x", "tools": [], "budgets": { "execution_time": 5 } }),
            json!({ "objective": "x", "tools": ["llm_call"], "budgets": { "execution_time": 0 } }),
            json!({ "objective": "x", "tools": ["llm_call"], "budgets": { "execution_time": 5 }, "max_concurrent": 11 }),
            json!({ "objective": "x", "tools": ["llm_call"], "budgets": { "execution_time": 5 }, "timeout_seconds": 31 }),
            json!({ "objective": "x", "tools": ["llm_call"], "budgets": { "execution_time": 5 }, "max_retries": 4 }),
        ] {
            assert!(NodeConfig::parse(NodeType::Agent, &cfg).is_err());
        }
    }

    #[test]
    fn extract_config_requires_file_id() {
        assert!(NodeConfig::parse(NodeType::ExtractText, &json!({})).is_err());
        let cfg = json!({ "file_id": uuid::Uuid::new_v4() });
        assert!(NodeConfig::parse(NodeType::ExtractText, &cfg).is_ok());
    }
}
