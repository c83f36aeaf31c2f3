//! Scenario definitions
//!
//! A scenario is a named, immutable set of prompts that is replayed once per
//! round. The prompt text must be identical across rounds for the cache-hit
//! round to be meaningful.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The closed set of prompt-construction strategies
#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// One long shared document followed by a varying question
    HighPrefixReuse,
    /// A conversation whose history grows with every request
    MultiTurnConversation,
    /// A shared code context followed by a varying task
    CodeGenerationContext,
    /// A long shared instruction followed by a short unique text
    BatchSharedInstruction,
    /// Prompts that diverge from the very first token
    ColdStartUnique,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Infers the kind from a conventional scenario name.
    ///
    /// Accepts both the kebab-case kind names and the historical snake_case
    /// scenario names used in benchmark configuration files.
    pub fn from_scenario_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "high-prefix-reuse" | "long_context_high_reuse" => Some(Self::HighPrefixReuse),
            "multi-turn-conversation" | "multi_turn_conversation" => {
                Some(Self::MultiTurnConversation)
            }
            "code-generation-context" | "code_generation" => Some(Self::CodeGenerationContext),
            "batch-shared-instruction" | "batch_processing" => Some(Self::BatchSharedInstruction),
            "cold-start-unique" | "cold_start" => Some(Self::ColdStartUnique),
            _ => None,
        }
    }
}

/// One prompt of a scenario, ready to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    /// Position in the scenario; doubles as the request id in every round
    pub index: usize,
    /// Literal prompt text
    pub text: String,
    /// Estimated input-token count
    pub token_estimate: u64,
}

/// A fully generated scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario identifier, usually the configuration key
    pub id: String,
    /// Strategy the prompts were built with
    pub kind: ScenarioKind,
    /// Ordered prompts, replayed unchanged in every round
    pub prompts: Vec<PromptDescriptor>,
    /// Number of rounds to run (round 1 is the cold baseline)
    pub round_count: u32,
    /// Round number to endpoint URL overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_overrides: BTreeMap<u32, String>,
}

impl Scenario {
    /// Returns the endpoint for `round`, falling back to `default_endpoint`.
    pub fn endpoint_for_round<'a>(&'a self, round: u32, default_endpoint: &'a str) -> &'a str {
        self.endpoint_overrides
            .get(&round)
            .map(String::as_str)
            .unwrap_or(default_endpoint)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case("long_context_high_reuse", ScenarioKind::HighPrefixReuse)]
    #[case("multi_turn_conversation", ScenarioKind::MultiTurnConversation)]
    #[case("code_generation", ScenarioKind::CodeGenerationContext)]
    #[case("batch_processing", ScenarioKind::BatchSharedInstruction)]
    #[case("cold_start", ScenarioKind::ColdStartUnique)]
    #[case("Cold-Start-Unique", ScenarioKind::ColdStartUnique)]
    fn test_kind_from_scenario_name(#[case] name: &str, #[case] expected: ScenarioKind) {
        assert_eq!(ScenarioKind::from_scenario_name(name), Some(expected));
    }

    #[test]
    fn test_kind_string_forms() {
        assert_eq!(ScenarioKind::HighPrefixReuse.as_str(), "high-prefix-reuse");
        assert_eq!(
            ScenarioKind::from_str("batch-shared-instruction").unwrap(),
            ScenarioKind::BatchSharedInstruction
        );
        assert!(ScenarioKind::from_scenario_name("warmup").is_none());
    }

    #[test]
    fn test_endpoint_for_round_uses_override() {
        let scenario = Scenario {
            id: "cross_node".to_string(),
            kind: ScenarioKind::HighPrefixReuse,
            prompts: vec![],
            round_count: 2,
            endpoint_overrides: BTreeMap::from([(2, "http://node-b:8000/v1".to_string())]),
        };
        assert_eq!(
            scenario.endpoint_for_round(1, "http://node-a:8000/v1"),
            "http://node-a:8000/v1"
        );
        assert_eq!(
            scenario.endpoint_for_round(2, "http://node-a:8000/v1"),
            "http://node-b:8000/v1"
        );
    }
}
