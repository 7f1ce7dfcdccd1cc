//! `formatter` node — deterministic text transformation rules.

use async_trait::async_trait;

use crate::config::{FormatRule, NodeConfig, NodeType};
use crate::error::NodeError;
use crate::traits::{NodeExecutor, Services};

pub struct FormatterNode;

#[async_trait]
impl NodeExecutor for FormatterNode {
    async fn execute(
        &self,
        config_snapshot: &serde_json::Value,
        input_text: &str,
        _services: &Services,
    ) -> Result<String, NodeError> {
        let NodeConfig::Formatter(config) = NodeConfig::parse(NodeType::Formatter, config_snapshot)?
        else {
            unreachable!("parse returns the variant matching the node type");
        };
        Ok(apply_rules(input_text, &config.rules))
    }
}

/// Apply rules in listed order.  An empty list returns the input unchanged.
pub fn apply_rules(text: &str, rules: &[FormatRule]) -> String {
    rules
        .iter()
        .fold(text.to_string(), |acc, rule| apply_rule(&acc, *rule))
}

fn apply_rule(text: &str, rule: FormatRule) -> String {
    match rule {
        FormatRule::Lowercase => text.to_lowercase(),
        FormatRule::Uppercase => text.to_uppercase(),
        FormatRule::HalfToFull => text.chars().map(half_to_full).collect(),
        FormatRule::FullToHalf => text.chars().map(full_to_half).collect(),
    }
}

// Width conversion covers ASCII space (U+0020 ↔ U+3000) and the printable
// range 0x21–0x7E ↔ fullwidth U+FF01–U+FF5E; everything else passes through.

fn half_to_full(c: char) -> char {
    match c as u32 {
        0x20 => '\u{3000}',
        code @ 0x21..=0x7E => char::from_u32(code - 0x21 + 0xFF01).unwrap_or(c),
        _ => c,
    }
}

fn full_to_half(c: char) -> char {
    match c as u32 {
        0x3000 => ' ',
        code @ 0xFF01..=0xFF5E => char::from_u32(code - 0xFF01 + 0x21).unwrap_or(c),
        _ => c,
    }
}
