//! `generative_ai` node — prompt templating plus one LLM call.

use async_trait::async_trait;

use crate::config::{NodeConfig, NodeType, DEFAULT_MAX_TOKENS};
use crate::error::NodeError;
use crate::llm::LlmRequest;
use crate::traits::{NodeExecutor, Services};

/// Placeholder substituted with the node's input text.
pub const TEXT_PLACEHOLDER: &str = "{text}";

pub struct GenerativeAiNode;

#[async_trait]
impl NodeExecutor for GenerativeAiNode {
    async fn execute(
        &self,
        config_snapshot: &serde_json::Value,
        input_text: &str,
        services: &Services,
    ) -> Result<String, NodeError> {
        let NodeConfig::GenerativeAi(config) =
            NodeConfig::parse(NodeType::GenerativeAi, config_snapshot)?
        else {
            unreachable!("parse returns the variant matching the node type");
        };

        let request = LlmRequest {
            model: config.model,
            prompt: render_prompt(&config.prompt, input_text),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            top_p: config.top_p,
        };

        let output = services.llm.complete(&request).await?;
        Ok(output)
    }
}

/// Substitute the input at the literal `{text}` placeholder.  Templates
/// without the placeholder are used verbatim with the input appended after
/// a blank line (nothing is appended for empty input).
pub fn render_prompt(template: &str, input_text: &str) -> String {
    if template.contains(TEXT_PLACEHOLDER) {
        template.replace(TEXT_PLACEHOLDER, input_text)
    } else if input_text.is_empty() {
        template.to_string()
    } else {
        format!("{template}\n\n{input_text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_services_with_llm, MockLlm};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn placeholder_is_substituted_literally() {
        assert_eq!(render_prompt("Summarize: {text}", "report"), "Summarize: report");
        // Every occurrence is replaced.
        assert_eq!(render_prompt("{text}/{text}", "a"), "a/a");
    }

    #[test]
    fn missing_placeholder_appends_input_after_blank_line() {
        assert_eq!(render_prompt("Summarize.", "report"), "Summarize.\n\nreport");
        assert_eq!(render_prompt("Summarize.", ""), "Summarize.");
    }

    #[tokio::test]
    async fn request_carries_model_and_default_max_tokens() {
        let llm = Arc::new(MockLlm::returning("ok"));
        let services = mock_services_with_llm(llm.clone());

        let cfg = json!({ "model": "gpt-4o", "prompt": "Shorten: {text}", "temperature": 0.2 });
        let out = GenerativeAiNode
            .execute(&cfg, "long text", &services)
            .await
            .unwrap();
        assert_eq!(out, "ok");

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "gpt-4o");
        assert_eq!(calls[0].prompt, "Shorten: long text");
        assert_eq!(calls[0].temperature, Some(0.2));
        assert_eq!(calls[0].max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[tokio::test]
    async fn snapshot_validation_rejects_unknown_model() {
        let services = crate::mock::mock_services();
        let cfg = json!({ "model": "o3", "prompt": "{text}" });
        let err = GenerativeAiNode
            .execute(&cfg, "input", &services)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }
}
