// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end runs of the wired pipeline: directive in, settled strategy,
//! learned pattern and advisories out.

use std::time::Duration;

use vigil_core::application::directive::StrategyStatusView;
use vigil_core::domain::message::topics;
use vigil_core::domain::node_config::{StorageBackend, VigilConfig, WorkerConfig};
use vigil_core::domain::strategy::{StrategyId, StrategyStatus};
use vigil_core::domain::Severity;
use vigil_core::runtime::Pipeline;
use vigil_cortex::CortexService;

fn test_config(fail_keys: Vec<String>) -> VigilConfig {
    let mut config = VigilConfig::default();
    config.spec.storage.backend = StorageBackend::Memory;
    config.spec.bus.poll_interval = Duration::from_millis(20);
    config.spec.retry.base_timeout = Duration::from_secs(2);
    config.spec.retry.backoff = Duration::from_millis(1);
    config.spec.workers.local = WorkerConfig::Stub {
        name: "local".to_string(),
        fail_keys,
        cost_per_task: 0.0,
    };
    config
}

async fn wait_for_settled(pipeline: &Pipeline, id: StrategyId) -> StrategyStatusView {
    let directives = pipeline.directive_service();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(view) = directives.query_status(id).await.unwrap() {
            if matches!(view.status, StrategyStatus::Completed | StrategyStatus::Failed) {
                return view;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "strategy {} never settled", id);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_topic(pipeline: &Pipeline, topic: &str, at_least: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while pipeline.bus().topic_len(topic).unwrap() < at_least {
        assert!(tokio::time::Instant::now() < deadline, "topic {} stayed below {}", topic, at_least);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_learning(pipeline: &Pipeline) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while pipeline.cortex().list().await.unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "outcome was never learned");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_directive_runs_to_completion_and_is_learned() {
    let pipeline = Pipeline::from_config(&test_config(vec![])).await.unwrap();
    let handle = pipeline.start();

    let id = pipeline
        .directive_service()
        .submit_directive("restart the flaky payments worker", Severity::Low)
        .await
        .unwrap();

    let view = wait_for_settled(&pipeline, id).await;
    assert_eq!(view.status, StrategyStatus::Completed);
    assert!(view.tasks.iter().all(|t| t.status.is_terminal()));
    assert!(view.verification.as_ref().unwrap().passed);

    wait_for_topic(&pipeline, topics::OUTCOMES, 1).await;
    wait_for_learning(&pipeline).await;
    let patterns = pipeline.cortex().list().await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].confidence, 1.0);

    assert!(!handle.is_halted());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_strategy_requests_replan() {
    let pipeline = Pipeline::from_config(&test_config(vec!["integrate".to_string()])).await.unwrap();
    let handle = pipeline.start();

    let id = pipeline
        .directive_service()
        .submit_directive("rotate the leaked deploy key", Severity::Low)
        .await
        .unwrap();

    let view = wait_for_settled(&pipeline, id).await;
    assert_eq!(view.status, StrategyStatus::Failed);
    let verification = view.verification.unwrap();
    assert!(verification.failing_checks.contains(&"task:integrate".to_string()));

    wait_for_topic(&pipeline, topics::ADVISORIES, 1).await;
    let advisories = pipeline.bus().read_from(topics::ADVISORIES, 0, 10).unwrap();
    assert!(advisories.iter().any(|m| m.payload["type"] == "replan_requested"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_sled_backend_keeps_strategies_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(vec![]);
    config.spec.storage.backend = StorageBackend::Sled;
    config.spec.storage.data_dir = dir.path().join("data");

    let id = {
        let pipeline = Pipeline::from_config(&config).await.unwrap();
        let handle = pipeline.start();
        let id = pipeline
            .directive_service()
            .submit_directive("clear the stale build cache", Severity::Low)
            .await
            .unwrap();
        wait_for_settled(&pipeline, id).await;
        wait_for_learning(&pipeline).await;
        handle.shutdown().await;
        id
    };

    let reopened = Pipeline::from_config(&config).await.unwrap();
    let view = reopened.directive_service().query_status(id).await.unwrap().unwrap();
    assert_eq!(view.status, StrategyStatus::Completed);
    assert!(!reopened.cortex().list().await.unwrap().is_empty());
}
