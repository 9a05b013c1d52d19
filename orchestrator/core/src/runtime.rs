// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pipeline Runtime
//!
//! Wires every component from a [`VigilConfig`] and runs the stages as
//! independent long-lived tasks under one shared shutdown token:
//!
//! | Task | Consumes | Produces |
//! |------|----------|----------|
//! | perception | telemetry channel | `signals` |
//! | cognition (planning) | `signals` | `strategies`, `advisories` |
//! | cognition (learning) | `outcomes` | pattern memory, `advisories` |
//! | action | `strategies` | `outcomes` |
//! | advisory forwarder | budget events | `advisories` |
//!
//! Stages share nothing but the bus, the repositories and the cost router.
//!
//! Two tokens control the stages. Shutdown stops the loops and lets a running
//! strategy finish its current wave, leaving its remaining tasks Pending for
//! redelivery. Halt is the fatal path: it is raised when a stage's bus stays
//! unavailable after retries, cancels the remaining tasks of a running
//! strategy, and implies shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use vigil_cortex::infrastructure::{HashEmbedder, InMemoryPatternRepository, InMemoryVectorIndex, PatternRepository, SledPatternRepository};
use vigil_cortex::StandardCortexService;

use crate::application::action::ActionStage;
use crate::application::cognition::CognitionStage;
use crate::application::cost_router::CostRouter;
use crate::application::dag_builder::DagBuilder;
use crate::application::directive::DirectiveService;
use crate::application::execution_engine::{CapabilityMap, ExecutionEngine};
use crate::application::perception::PerceptionStage;
use crate::application::planner::TemplatePlanner;
use crate::application::retry::RetryPolicy;
use crate::application::verification_gate::VerificationGate;
use crate::domain::events::Advisory;
use crate::domain::message::topics;
use crate::domain::node_config::{StorageBackend, VigilConfig};
use crate::domain::repository::StrategyRepository;
use crate::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};
use crate::infrastructure::message_bus::MessageBus;
use crate::infrastructure::repositories::{InMemoryStrategyRepository, SledStrategyRepository};
use crate::infrastructure::telemetry::{ChannelTelemetrySource, TelemetrySender, DEFAULT_TELEMETRY_CAPACITY};
use crate::infrastructure::verifiers::build_verifier;

pub struct Pipeline {
    bus: MessageBus,
    event_bus: Arc<EventBus>,
    router: Arc<CostRouter>,
    repo: Arc<dyn StrategyRepository>,
    cortex: Arc<StandardCortexService>,
    telemetry: TelemetrySender,
    perception: Arc<PerceptionStage>,
    cognition: Arc<CognitionStage>,
    action: Arc<ActionStage>,
    halt: CancellationToken,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub async fn from_config(config: &VigilConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let spec = &config.spec;
        let halt = CancellationToken::new();
        let shutdown = halt.child_token();
        let event_bus = Arc::new(EventBus::with_default_capacity());

        let (bus, repo, patterns, router) = match spec.storage.backend {
            StorageBackend::Sled => {
                let path = &spec.storage.data_dir;
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create data directory {}", path.display()))?;
                let db = sled::open(path).with_context(|| format!("Failed to open database at {}", path.display()))?;
                info!(data_dir = %path.display(), "Opened embedded store");
                let repo: Arc<dyn StrategyRepository> = Arc::new(SledStrategyRepository::from_db(&db)?);
                let patterns: Arc<dyn PatternRepository> = Arc::new(SledPatternRepository::from_db(&db)?);
                let router = CostRouter::open_persistent(&spec.router, &db)?;
                (MessageBus::from_db(db, &spec.bus), repo, patterns, router)
            }
            StorageBackend::Memory => {
                warn!("Memory storage backend: nothing survives a restart");
                let repo: Arc<dyn StrategyRepository> = Arc::new(InMemoryStrategyRepository::new());
                let patterns: Arc<dyn PatternRepository> = Arc::new(InMemoryPatternRepository::new());
                (MessageBus::temporary(&spec.bus)?, repo, patterns, CostRouter::new(&spec.router))
            }
        };
        let router = Arc::new(router.with_event_bus(event_bus.clone()));

        let mut cortex = StandardCortexService::new(patterns, event_bus.clone()).with_smoothing(spec.patterns.smoothing);
        if spec.patterns.semantic_search {
            cortex = cortex
                .with_semantic_search(
                    Arc::new(HashEmbedder::new(spec.patterns.embedding_dimensions)),
                    Arc::new(InMemoryVectorIndex::new()),
                )
                .with_min_similarity(spec.patterns.min_similarity);
        }
        let cortex = Arc::new(cortex);
        let indexed = cortex.rebuild_index().await?;
        info!(indexed, semantic = cortex.semantic_enabled(), "Pattern memory ready");

        let retry = RetryPolicy::from_config(&spec.retry);
        let capabilities = CapabilityMap::from_config(&spec.workers)?;
        for (tier, err) in capabilities.probe().await {
            warn!(tier = %tier, error = %err, "Worker failed its health check; tasks on this tier will retry until it recovers");
        }
        let dag = DagBuilder::new(router.clone(), capabilities.tiers()).with_max_tasks(spec.dag.max_tasks);

        let engine = ExecutionEngine::new(capabilities, router.clone(), retry.clone())
            .with_pool_size(spec.engine.worker_pool_size)
            .with_event_bus(event_bus.clone())
            .with_halt_token(halt.clone())
            .with_shutdown_token(shutdown.clone());
        let gate = VerificationGate::new(build_verifier(&spec.verification), retry.clone()).with_event_bus(event_bus.clone());

        let (telemetry, source) = ChannelTelemetrySource::channel(DEFAULT_TELEMETRY_CAPACITY);
        let perception = Arc::new(PerceptionStage::new(Arc::new(source), bus.clone(), retry.clone()));
        let cognition = Arc::new(
            CognitionStage::new(
                bus.clone(),
                cortex.clone(),
                Arc::new(TemplatePlanner::new(spec.planner.max_remediations)),
                dag,
                repo.clone(),
            )
            .with_event_bus(event_bus.clone())
            .with_query_limit(spec.patterns.query_limit)
            .with_retry(retry.clone()),
        );
        let action = Arc::new(ActionStage::new(bus.clone(), repo.clone(), engine, gate).with_retry(retry));

        Ok(Self {
            bus,
            event_bus,
            router,
            repo,
            cortex,
            telemetry,
            perception,
            cognition,
            action,
            halt,
            shutdown,
        })
    }

    pub fn directive_service(&self) -> DirectiveService {
        DirectiveService::new(self.bus.clone(), self.repo.clone(), self.router.clone())
    }

    pub fn telemetry_sender(&self) -> TelemetrySender {
        self.telemetry.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn router(&self) -> Arc<CostRouter> {
        self.router.clone()
    }

    pub fn cortex(&self) -> Arc<StandardCortexService> {
        self.cortex.clone()
    }

    pub fn bus(&self) -> MessageBus {
        self.bus.clone()
    }

    /// Cancelled only by a fatal halt
    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    /// Spawn every stage; the returned handle stops them
    pub fn start(&self) -> PipelineHandle {
        let mut tasks = JoinSet::new();
        let token = self.shutdown.clone();

        let perception = self.perception.clone();
        let (bus, t, h) = (self.bus.clone(), token.clone(), self.halt.clone());
        tasks.spawn(async move {
            if let Err(err) = perception.run(t).await {
                halt(&bus, &h, "perception", err.to_string()).await;
            }
        });

        let cognition = self.cognition.clone();
        let (bus, t, h) = (self.bus.clone(), token.clone(), self.halt.clone());
        tasks.spawn(async move {
            if let Err(err) = cognition.run_planning(t).await {
                halt(&bus, &h, "cognition", err.to_string()).await;
            }
        });

        let learning = self.cognition.clone();
        let (bus, t, h) = (self.bus.clone(), token.clone(), self.halt.clone());
        tasks.spawn(async move {
            if let Err(err) = learning.run_learning(t).await {
                halt(&bus, &h, "learning", err.to_string()).await;
            }
        });

        let action = self.action.clone();
        let (bus, t, h) = (self.bus.clone(), token.clone(), self.halt.clone());
        tasks.spawn(async move {
            if let Err(err) = action.run(t).await {
                halt(&bus, &h, "action", err.to_string()).await;
            }
        });

        tasks.spawn(forward_advisories(self.event_bus.clone(), self.bus.clone(), token.clone()));

        info!("Pipeline started");
        PipelineHandle {
            tasks,
            shutdown: token,
            halt: self.halt.clone(),
        }
    }
}

pub struct PipelineHandle {
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
    halt: CancellationToken,
}

impl PipelineHandle {
    /// Stop the stages, let running waves drain, and wait for every stage.
    /// Tasks that were never dispatched stay Pending and resume after restart.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Pipeline task panicked");
            }
        }
        info!("Pipeline stopped");
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }
}

async fn halt(bus: &MessageBus, halt: &CancellationToken, stage: &str, reason: String) {
    error!(stage, reason = %reason, "Fatal stage failure; halting pipeline");
    let advisory = Advisory::FatalHalt {
        reason: format!("{}: {}", stage, reason),
        halted_at: Utc::now(),
    };
    if let Err(err) = bus.publish(topics::ADVISORIES, &advisory, Uuid::new_v4()).await {
        error!(error = %err, "Could not publish fatal halt advisory");
    }
    halt.cancel();
}

/// Budget transitions become durable operator advisories
async fn forward_advisories(event_bus: Arc<EventBus>, bus: MessageBus, shutdown: CancellationToken) {
    let mut receiver = event_bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = receiver.recv() => event,
        };
        match event {
            Ok(DomainEvent::Budget(event)) => {
                let advisory = Advisory::Budget { event };
                if let Err(err) = bus.publish(topics::ADVISORIES, &advisory, Uuid::new_v4()).await {
                    warn!(error = %err, "Failed to publish budget advisory");
                }
            }
            Ok(_) => {}
            Err(EventBusError::Lagged(skipped)) => warn!(skipped, "Advisory forwarder lagged"),
            Err(_) => break,
        }
    }
}
