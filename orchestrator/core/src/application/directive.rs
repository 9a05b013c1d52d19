// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Directive Service
//!
//! Entry point for operators: turns a free-text directive (or a raw signal)
//! into a durable message on `signals` and reports strategy progress.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::application::cost_router::CostRouter;
use crate::domain::cost::Tier;
use crate::domain::errors::OrchestratorError;
use crate::domain::message::topics;
use crate::domain::repository::StrategyRepository;
use crate::domain::strategy::{Strategy, StrategyId, StrategyStatus};
use crate::domain::task::TaskStatus;
use crate::domain::verification::VerificationResult;
use crate::domain::{Severity, Signal};
use crate::infrastructure::message_bus::MessageBus;

pub const DIRECTIVE_SOURCE: &str = "operator";
pub const DIRECTIVE_CATEGORY: &str = "directive";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub key: String,
    pub description: String,
    pub tier: Tier,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatusView {
    pub strategy_id: StrategyId,
    pub correlation_id: uuid::Uuid,
    pub status: StrategyStatus,
    pub severity: Severity,
    pub tasks: Vec<TaskStatusView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Strategy> for StrategyStatusView {
    fn from(strategy: &Strategy) -> Self {
        Self {
            strategy_id: strategy.id,
            correlation_id: strategy.correlation_id,
            status: strategy.status,
            severity: strategy.signal.severity,
            tasks: strategy
                .tasks
                .iter()
                .map(|t| TaskStatusView {
                    key: t.key.clone(),
                    description: t.description.clone(),
                    tier: t.assigned_tier,
                    status: t.status,
                    error: t.error.clone(),
                })
                .collect(),
            verification: strategy.verification.clone(),
            created_at: strategy.created_at,
            updated_at: strategy.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct DirectiveService {
    bus: MessageBus,
    repo: Arc<dyn StrategyRepository>,
    router: Arc<CostRouter>,
}

impl DirectiveService {
    pub fn new(bus: MessageBus, repo: Arc<dyn StrategyRepository>, router: Arc<CostRouter>) -> Self {
        Self { bus, repo, router }
    }

    /// Publish a directive as a signal; returns the id its strategy will have
    pub async fn submit_directive(&self, text: &str, severity: Severity) -> Result<StrategyId, OrchestratorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OrchestratorError::Validation("directive text is empty".into()));
        }
        let signal = Signal::new(DIRECTIVE_SOURCE, DIRECTIVE_CATEGORY, severity, json!({ "directive": text }));
        self.submit_signal(signal).await
    }

    /// Durable before returning
    pub async fn submit_signal(&self, signal: Signal) -> Result<StrategyId, OrchestratorError> {
        if signal.category.trim().is_empty() {
            return Err(OrchestratorError::Validation("signal category is empty".into()));
        }
        let correlation_id = signal.id.0;
        self.bus.publish(topics::SIGNALS, &signal, correlation_id).await?;
        let strategy_id = StrategyId::for_correlation(correlation_id);
        info!(signal_id = %signal.id, strategy_id = %strategy_id, severity = %signal.severity, "Signal submitted");
        Ok(strategy_id)
    }

    /// `None` until cognition has planned the strategy
    pub async fn query_status(&self, id: StrategyId) -> Result<Option<StrategyStatusView>, OrchestratorError> {
        Ok(self.repo.find_by_id(id).await?.as_ref().map(StrategyStatusView::from))
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<StrategyStatusView>, OrchestratorError> {
        Ok(self
            .repo
            .list_recent(limit)
            .await?
            .iter()
            .map(StrategyStatusView::from)
            .collect())
    }

    pub fn router(&self) -> &Arc<CostRouter> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node_config::{BusConfig, RouterConfig};
    use crate::infrastructure::repositories::InMemoryStrategyRepository;

    fn service() -> (DirectiveService, MessageBus, Arc<InMemoryStrategyRepository>) {
        let bus = MessageBus::temporary(&BusConfig::default()).unwrap();
        let repo = Arc::new(InMemoryStrategyRepository::new());
        let router = Arc::new(CostRouter::new(&RouterConfig::default()));
        (DirectiveService::new(bus.clone(), repo.clone(), router), bus, repo)
    }

    #[tokio::test]
    async fn test_directive_becomes_durable_signal() {
        let (service, bus, _) = service();
        let id = service.submit_directive("rotate the leaked api key", Severity::High).await.unwrap();

        let messages = bus.read_from(topics::SIGNALS, 0, 10).unwrap();
        assert_eq!(messages.len(), 1);
        let signal: Signal = messages[0].decode().unwrap();
        assert_eq!(signal.category, DIRECTIVE_CATEGORY);
        assert_eq!(StrategyId::for_correlation(messages[0].correlation_id), id);
    }

    #[tokio::test]
    async fn test_empty_directive_is_rejected() {
        let (service, _, _) = service();
        let err = service.submit_directive("   ", Severity::Low).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_status_view_reflects_repository() {
        let (service, _, repo) = service();
        let id = service.submit_directive("restart api", Severity::Low).await.unwrap();
        assert!(service.query_status(id).await.unwrap().is_none());

        let signal = Signal::new(DIRECTIVE_SOURCE, DIRECTIVE_CATEGORY, Severity::Low, json!({}));
        let strategy = Strategy::new(signal.id.0, signal, Vec::new());
        repo.save(&strategy).await.unwrap();

        let view = service.query_status(strategy.id).await.unwrap().unwrap();
        assert_eq!(view.status, StrategyStatus::Planned);
        assert_eq!(service.recent(5).await.unwrap().len(), 1);
    }
}
