// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Implementations
//!
//! Concrete [`Worker`]s that back the capability map.
//!
//! | Worker | Backing | Use |
//! |--------|---------|-----|
//! | [`StubWorker`] | in-process | dry runs, tests, air-gapped demos |
//! | [`ModelWorker`] | any [`LLMProvider`] | Ollama for the local tier, OpenAI for the cloud tier |

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::llm::{FinishReason, GenerationOptions, LLMError, LLMProvider};
use crate::domain::node_config::{resolve_secret, ConfigError, WorkerConfig};
use crate::domain::task::Task;
use crate::domain::worker::{Artifact, TaskContext, Worker, WorkerError};
use crate::infrastructure::llm::{OllamaAdapter, OpenAIAdapter};

/// Deterministic worker that echoes the task and fails on configured keys
pub struct StubWorker {
    name: String,
    fail_keys: HashSet<String>,
    cost_per_task: f64,
}

impl StubWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_keys: HashSet::new(),
            cost_per_task: 0.0,
        }
    }

    pub fn failing_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_cost_per_task(mut self, cost: f64) -> Self {
        self.cost_per_task = cost;
        self
    }
}

#[async_trait]
impl Worker for StubWorker {
    async fn execute(&self, task: &Task, context: &TaskContext) -> Result<Artifact, WorkerError> {
        if self.fail_keys.contains(&task.key) {
            return Err(WorkerError::Rejected(format!("{} is configured to fail '{}'", self.name, task.key)));
        }
        let upstream: Vec<&str> = context.upstream.keys().map(String::as_str).collect();
        let content = if upstream.is_empty() {
            format!("{}: {}", task.key, task.description)
        } else {
            format!("{}: {} (after {})", task.key, task.description, upstream.join(", "))
        };
        Ok(Artifact {
            content,
            agent: self.name.clone(),
            unit_count: 1,
            cost: self.cost_per_task,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Worker that delegates each task to a language model
pub struct ModelWorker {
    name: String,
    provider: Arc<dyn LLMProvider>,
    options: GenerationOptions,
    cost_per_1k_tokens: f64,
}

impl ModelWorker {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>, cost_per_1k_tokens: f64) -> Self {
        Self {
            name: name.into(),
            provider,
            options: GenerationOptions::default(),
            cost_per_1k_tokens,
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn prompt(task: &Task, context: &TaskContext) -> String {
        let mut prompt = format!(
            "You are remediating a production signal.\n\nSignal ({} / {} / {}):\n{}\n\nTask '{}': {}\n",
            context.signal.source,
            context.signal.category,
            context.signal.severity,
            context.signal.payload,
            task.key,
            task.description,
        );
        if !context.upstream.is_empty() {
            prompt.push_str("\nResults of prerequisite tasks:\n");
            for (key, output) in &context.upstream {
                prompt.push_str(&format!("- {}: {}\n", key, output));
            }
        }
        prompt.push_str("\nRespond with the concrete result of this task only.");
        prompt
    }
}

impl From<LLMError> for WorkerError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Network(_) | LLMError::RateLimit | LLMError::Provider(_) => WorkerError::Transient(err.to_string()),
            LLMError::Authentication(_) | LLMError::ModelNotFound(_) | LLMError::InvalidInput(_) => {
                WorkerError::Rejected(err.to_string())
            }
        }
    }
}

#[async_trait]
impl Worker for ModelWorker {
    async fn execute(&self, task: &Task, context: &TaskContext) -> Result<Artifact, WorkerError> {
        let prompt = Self::prompt(task, context);
        let response = self.provider.generate(&prompt, &self.options).await?;

        if response.finish_reason == FinishReason::Length {
            return Err(WorkerError::IncompleteContext(format!(
                "{} response for '{}' was truncated",
                self.provider.provider(),
                task.key
            )));
        }
        if response.text.trim().is_empty() {
            return Err(WorkerError::IncompleteContext(format!(
                "{} returned an empty response for '{}'",
                self.provider.provider(),
                task.key
            )));
        }

        let units = response.usage.total();
        let cost = units as f64 / 1000.0 * self.cost_per_1k_tokens;
        debug!(task = %task.key, model = %response.model, tokens = units, cost, "Model worker finished task");

        Ok(Artifact {
            content: response.text,
            agent: format!("{}:{}", self.name, response.model),
            unit_count: units,
            cost,
        })
    }

    async fn health_check(&self) -> Result<(), WorkerError> {
        self.provider.health_check().await.map_err(WorkerError::from)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Instantiate the worker described by one `workers.<tier>` config entry
pub fn build_worker(config: &WorkerConfig) -> Result<Arc<dyn Worker>, ConfigError> {
    Ok(match config {
        WorkerConfig::Stub { name, fail_keys, cost_per_task } => Arc::new(
            StubWorker::new(name.clone())
                .failing_on(fail_keys.iter().cloned())
                .with_cost_per_task(*cost_per_task),
        ),
        WorkerConfig::Ollama { endpoint, model, cost_per_1k_tokens } => Arc::new(ModelWorker::new(
            "ollama",
            Arc::new(OllamaAdapter::new(endpoint.clone(), model.clone())),
            *cost_per_1k_tokens,
        )),
        WorkerConfig::OpenAI { endpoint, api_key, model, cost_per_1k_tokens } => Arc::new(ModelWorker::new(
            "openai",
            Arc::new(OpenAIAdapter::new(endpoint.clone(), resolve_secret(api_key)?, model.clone())),
            *cost_per_1k_tokens,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cost::Tier;
    use crate::domain::llm::{GenerationResponse, TokenUsage};
    use crate::domain::strategy::StrategyId;
    use crate::domain::task::TaskId;
    use crate::domain::{Severity, Signal};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<GenerationResponse, LLMError>>>,
        reachable: bool,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<GenerationResponse, LLMError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                reachable: true,
            }
        }

        fn unreachable() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                reachable: false,
            }
        }
    }

    fn response(text: &str, finish_reason: FinishReason) -> GenerationResponse {
        GenerationResponse {
            text: text.to_string(),
            usage: TokenUsage { prompt_tokens: 1500, completion_tokens: 500 },
            model: "llama3".to_string(),
            finish_reason,
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            self.responses.lock().remove(0)
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            if self.reachable {
                Ok(())
            } else {
                Err(LLMError::Network("connection refused".into()))
            }
        }

        fn provider(&self) -> &str {
            "scripted"
        }
    }

    fn task(key: &str) -> Task {
        let id = TaskId::derive(StrategyId::new(), key);
        Task::new(id, key, "restart the pod", BTreeSet::new(), Tier::Local)
    }

    fn context() -> TaskContext {
        TaskContext {
            strategy_id: StrategyId::new(),
            signal: Signal::new("kubelet", "memory", Severity::High, json!({"pod": "api"})),
            upstream: BTreeMap::from([("diagnose".to_string(), "heap leak".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_stub_worker_fails_configured_keys() {
        let worker = StubWorker::new("stub").failing_on(["deploy"]).with_cost_per_task(0.5);

        let artifact = worker.execute(&task("build"), &context()).await.unwrap();
        assert!(artifact.content.contains("after diagnose"));
        assert_eq!(artifact.cost, 0.5);

        let err = worker.execute(&task("deploy"), &context()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_health_check_reaches_provider() {
        assert!(StubWorker::new("stub").health_check().await.is_ok());
        assert!(ModelWorker::new("ollama", Arc::new(ScriptedProvider::new(vec![])), 0.0)
            .health_check()
            .await
            .is_ok());
        let err = ModelWorker::new("ollama", Arc::new(ScriptedProvider::unreachable()), 0.0)
            .health_check()
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transient(_)));
    }

    #[tokio::test]
    async fn test_model_worker_prices_tokens() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(response("patched", FinishReason::Stop))]));
        let worker = ModelWorker::new("ollama", provider, 0.02);

        let artifact = worker.execute(&task("fix"), &context()).await.unwrap();
        assert_eq!(artifact.unit_count, 2000);
        assert!((artifact.cost - 0.04).abs() < 1e-9);
        assert_eq!(artifact.agent, "ollama:llama3");
    }

    #[tokio::test]
    async fn test_truncated_or_empty_response_is_incomplete_context() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(response("half a pat", FinishReason::Length)),
            Ok(response("   ", FinishReason::Stop)),
        ]));
        let worker = ModelWorker::new("ollama", provider, 0.0);

        for _ in 0..2 {
            let err = worker.execute(&task("fix"), &context()).await.unwrap_err();
            assert!(matches!(err, WorkerError::IncompleteContext(_)));
        }
    }

    #[tokio::test]
    async fn test_provider_errors_map_to_worker_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LLMError::RateLimit),
            Err(LLMError::Authentication("bad key".into())),
        ]));
        let worker = ModelWorker::new("openai", provider, 0.0);

        assert!(matches!(worker.execute(&task("a"), &context()).await, Err(WorkerError::Transient(_))));
        assert!(matches!(worker.execute(&task("a"), &context()).await, Err(WorkerError::Rejected(_))));
    }

    #[test]
    fn test_build_worker_rejects_missing_secret() {
        let config = WorkerConfig::OpenAI {
            endpoint: "https://api.openai.com/v1".into(),
            api_key: "env:VIGIL_TEST_KEY_THAT_IS_NOT_SET".into(),
            model: "gpt-4o-mini".into(),
            cost_per_1k_tokens: 0.01,
        };
        assert!(build_worker(&config).is_err());
    }
}
