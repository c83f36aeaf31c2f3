//! Benchmark configuration
//!
//! Loaded from a YAML document, then overridden by environment variables and
//! validated before any round runs.

use crate::error::ConfigError;
use crate::prompt::{self, PromptStrategy};
use kvbench_types::{Scenario, ScenarioKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Top-level benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Inference endpoint settings
    pub endpoint: EndpointConfig,

    /// Generation parameters sent with every request
    #[serde(default)]
    pub model: ModelConfig,

    /// Round sequencing and dispatch settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Comparison thresholds
    #[serde(default)]
    pub targets: TargetThresholds,

    /// Named scenarios
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,

    /// Append the fixed-ratio PD stage estimate to console reports
    #[serde(default)]
    pub synthetic_stage_split: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the OpenAI-compatible API, e.g. `http://localhost:8000/v1`
    pub base_url: String,
    pub model_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Round number to base URL, for cross-node cache transfer runs
    #[serde(default)]
    pub endpoints_per_round: BTreeMap<u32, String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Free-form size label used in output file names
    #[serde(default = "default_model_size")]
    pub size: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            size: default_model_size(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum in-flight requests; unbounded when absent
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default = "default_wait_between_rounds_secs")]
    pub wait_between_rounds_secs: u64,
    #[serde(default = "default_wait_between_scenarios_secs")]
    pub wait_between_scenarios_secs: u64,
    #[serde(default = "default_round_count")]
    pub round_count: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            wait_between_rounds_secs: default_wait_between_rounds_secs(),
            wait_between_scenarios_secs: default_wait_between_scenarios_secs(),
            round_count: default_round_count(),
            output_dir: default_output_dir(),
        }
    }
}

impl ExecutionConfig {
    pub fn wait_between_rounds(&self) -> Duration {
        Duration::from_secs(self.wait_between_rounds_secs)
    }

    pub fn wait_between_scenarios(&self) -> Duration {
        Duration::from_secs(self.wait_between_scenarios_secs)
    }
}

/// Targets used to classify comparison results (all in percent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetThresholds {
    pub ttft_reduction_excellent: f64,
    pub ttft_reduction_partial: f64,
    pub throughput_increase_excellent: f64,
    pub throughput_increase_partial: f64,
    /// Maximum absolute TPOT change still considered stable
    pub tpot_stability_pct: f64,
}

impl Default for TargetThresholds {
    fn default() -> Self {
        Self {
            ttft_reduction_excellent: 60.0,
            ttft_reduction_partial: 40.0,
            throughput_increase_excellent: 150.0,
            throughput_increase_partial: 100.0,
            tpot_stability_pct: 10.0,
        }
    }
}

/// Declarative parameters of one scenario
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Prompt strategy; inferred from the scenario name when absent
    #[serde(default)]
    pub kind: Option<ScenarioKind>,
    #[serde(default)]
    pub description: Option<String>,
    pub num_requests: usize,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub conversation_turns: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub instruction_length: Option<u64>,
    #[serde(default)]
    pub content_length: Option<u64>,
}

impl ScenarioConfig {
    /// Resolves the kind and the parameters that kind needs.
    pub fn strategy(&self, name: &str) -> Result<PromptStrategy, ConfigError> {
        let kind = self
            .kind
            .or_else(|| ScenarioKind::from_scenario_name(name))
            .ok_or_else(|| {
                ConfigError::scenario(name, "no `kind` given and none can be inferred from the name")
            })?;

        let require = |value: Option<u64>, field: &str| {
            value.ok_or_else(|| ConfigError::scenario(name, format!("{kind} requires `{field}`")))
        };
        let non_empty = |list: &[String], field: &str| {
            if list.is_empty() {
                Err(ConfigError::scenario(
                    name,
                    format!("{kind} requires a non-empty `{field}` list"),
                ))
            } else {
                Ok(list.to_vec())
            }
        };

        let strategy = match kind {
            ScenarioKind::HighPrefixReuse => PromptStrategy::HighPrefixReuse {
                context_length: require(self.context_length, "context_length")?,
                questions: non_empty(&self.questions, "questions")?,
            },
            ScenarioKind::MultiTurnConversation => PromptStrategy::MultiTurnConversation {
                turns: non_empty(&self.conversation_turns, "conversation_turns")?,
            },
            ScenarioKind::CodeGenerationContext => PromptStrategy::CodeGenerationContext {
                context_length: require(self.context_length, "context_length")?,
                tasks: non_empty(&self.tasks, "tasks")?,
            },
            ScenarioKind::BatchSharedInstruction => PromptStrategy::BatchSharedInstruction {
                instruction_length: require(self.instruction_length, "instruction_length")?,
            },
            ScenarioKind::ColdStartUnique => PromptStrategy::ColdStartUnique {
                content_length: require(self.content_length, "content_length")?,
            },
        };
        Ok(strategy)
    }
}

impl BenchConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Reads, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(
            path = %path.display(),
            scenarios = config.scenarios.len(),
            "Loaded benchmark configuration"
        );
        Ok(config)
    }

    /// Override file values with environment variables if present
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("KVBENCH_BASE_URL") {
            self.endpoint.base_url = url;
        }

        if let Ok(model) = std::env::var("KVBENCH_MODEL") {
            self.endpoint.model_name = model;
        }

        if let Some(key) = std::env::var("KVBENCH_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        {
            self.endpoint.api_key = Some(key);
        }

        if let Some(concurrency) = env_parse::<usize>("KVBENCH_CONCURRENCY") {
            self.execution.concurrency = Some(concurrency);
        }

        if let Some(wait) = env_parse::<u64>("KVBENCH_WAIT_BETWEEN_ROUNDS") {
            self.execution.wait_between_rounds_secs = wait;
        }

        if let Ok(dir) = std::env::var("KVBENCH_OUTPUT_DIR") {
            self.execution.output_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.endpoint.base_url, "endpoint.base_url")?;

        if self.endpoint.model_name.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint.model_name must not be empty"));
        }

        if self.execution.round_count < 1 {
            return Err(ConfigError::invalid("execution.round_count must be at least 1"));
        }

        if self.execution.concurrency == Some(0) {
            return Err(ConfigError::invalid(
                "execution.concurrency must be greater than 0 when set",
            ));
        }

        for (round, url) in &self.endpoint.endpoints_per_round {
            if *round < 1 || *round > self.execution.round_count {
                return Err(ConfigError::invalid(format!(
                    "endpoints_per_round has round {round}, outside 1..={}",
                    self.execution.round_count
                )));
            }
            validate_url(url, &format!("endpoints_per_round[{round}]"))?;
        }

        let t = &self.targets;
        if t.ttft_reduction_partial > t.ttft_reduction_excellent {
            return Err(ConfigError::invalid(
                "targets.ttft_reduction_partial exceeds ttft_reduction_excellent",
            ));
        }
        if t.throughput_increase_partial > t.throughput_increase_excellent {
            return Err(ConfigError::invalid(
                "targets.throughput_increase_partial exceeds throughput_increase_excellent",
            ));
        }

        for (name, scenario) in &self.scenarios {
            if scenario.num_requests == 0 {
                return Err(ConfigError::scenario(name, "num_requests must be at least 1"));
            }
            scenario.strategy(name)?;
        }

        Ok(())
    }

    pub fn scenario(&self, name: &str) -> Result<&ScenarioConfig, ConfigError> {
        self.scenarios
            .get(name)
            .ok_or_else(|| ConfigError::UnknownScenario(name.to_string()))
    }

    /// Generates the prompts of `name` and attaches the round settings.
    pub fn build_scenario(&self, name: &str) -> Result<Scenario, ConfigError> {
        let scenario = self.scenario(name)?;
        let strategy = scenario.strategy(name)?;
        Ok(Scenario {
            id: name.to_string(),
            kind: strategy.kind(),
            prompts: prompt::generate_prompts(&strategy, scenario.num_requests),
            round_count: self.execution.round_count,
            endpoint_overrides: self.endpoint.endpoints_per_round.clone(),
        })
    }
}

fn validate_url(url: &str, field: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConfigError::invalid(format!("{field} must not be empty")));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::invalid(format!(
            "{field} must be an http(s) URL, got '{url}'"
        )));
    }
    Ok(())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| T::from_str(s.trim()).ok())
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_model_size() -> String {
    "unknown".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.7
}

fn default_wait_between_rounds_secs() -> u64 {
    15
}

fn default_wait_between_scenarios_secs() -> u64 {
    30
}

fn default_round_count() -> u32 {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
endpoint:
  base_url: http://localhost:8000/v1
  model_name: qwen2.5-7b
  endpoints_per_round:
    2: http://node-b:8000/v1
model:
  size: 7b
  max_tokens: 64
execution:
  concurrency: 4
  wait_between_rounds_secs: 5
scenarios:
  long_context_high_reuse:
    num_requests: 6
    context_length: 200
    questions: ["Summarize section 2.", "What is ZeRO?"]
  custom_chat:
    kind: multi-turn-conversation
    num_requests: 3
    conversation_turns: ["Hi", "Explain pipeline parallelism."]
"#;

    fn sample() -> BenchConfig {
        BenchConfig::from_yaml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = sample();
        assert_eq!(config.model.max_tokens, 64);
        assert_eq!(config.model.temperature, 0.7);
        assert_eq!(config.execution.round_count, 2);
        assert_eq!(config.execution.wait_between_scenarios_secs, 30);
        assert_eq!(config.endpoint.request_timeout_secs, 300);
        assert_eq!(config.targets, TargetThresholds::default());
        assert!(!config.synthetic_stage_split);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_scenario_infers_kind_from_name() {
        let config = sample();
        let scenario = config.build_scenario("long_context_high_reuse").unwrap();
        assert_eq!(scenario.kind, ScenarioKind::HighPrefixReuse);
        assert_eq!(scenario.prompts.len(), 6);
        assert_eq!(scenario.round_count, 2);
        assert_eq!(
            scenario.endpoint_for_round(2, &config.endpoint.base_url),
            "http://node-b:8000/v1"
        );

        let chat = config.build_scenario("custom_chat").unwrap();
        assert_eq!(chat.kind, ScenarioKind::MultiTurnConversation);
    }

    #[test]
    fn test_unknown_scenario() {
        assert!(matches!(
            sample().build_scenario("missing"),
            Err(ConfigError::UnknownScenario(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = sample();
        config.endpoint.base_url = "localhost:8000".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = sample();
        config.execution.concurrency = Some(0);
        assert!(config.validate().is_err());

        let mut config = sample();
        config.endpoint.endpoints_per_round.insert(3, "http://x/v1".to_string());
        assert!(config.validate().is_err());

        let mut config = sample();
        config.targets.ttft_reduction_partial = 80.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_incomplete_scenarios() {
        let mut config = sample();
        config
            .scenarios
            .get_mut("long_context_high_reuse")
            .unwrap()
            .questions
            .clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScenario { scenario, .. }) if scenario == "long_context_high_reuse"
        ));

        let mut config = sample();
        config.scenarios.insert(
            "mystery".to_string(),
            ScenarioConfig {
                num_requests: 1,
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        let mut config = sample();
        config.scenarios.get_mut("custom_chat").unwrap().num_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("KVBENCH_BASE_URL", "http://override:9000/v1");
        std::env::set_var("KVBENCH_CONCURRENCY", "16");
        std::env::set_var("KVBENCH_WAIT_BETWEEN_ROUNDS", "not-a-number");

        let mut config = sample();
        config.apply_env_overrides();

        std::env::remove_var("KVBENCH_BASE_URL");
        std::env::remove_var("KVBENCH_CONCURRENCY");
        std::env::remove_var("KVBENCH_WAIT_BETWEEN_ROUNDS");

        assert_eq!(config.endpoint.base_url, "http://override:9000/v1");
        assert_eq!(config.execution.concurrency, Some(16));
        // Invalid values keep the file value
        assert_eq!(config.execution.wait_between_rounds_secs, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = BenchConfig::from_file(&path).unwrap();
        assert_eq!(config.scenarios.len(), 2);

        let missing = BenchConfig::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
