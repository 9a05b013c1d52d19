// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground host: pipeline stages plus the HTTP command surface

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vigil_core::domain::node_config::VigilConfig;
use vigil_core::presentation::api;
use vigil_core::runtime::Pipeline;

pub async fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = VigilConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(port) = port {
        config.spec.api.port = port;
    }
    config.validate().context("Configuration validation failed")?;

    info!(node = %config.metadata.name, "Vigil starting (PID: {})", std::process::id());

    let pipeline = Pipeline::from_config(&config).await?;
    let handle = pipeline.start();
    let halted = pipeline.halt_token();

    let app = api::app(pipeline.directive_service());
    let addr = format!("{}:{}", config.spec.api.bind_address, config.spec.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(halted))
        .await
        .context("HTTP server failed")?;

    info!("Draining pipeline");
    let halted = handle.is_halted();
    handle.shutdown().await;
    if halted {
        anyhow::bail!("Pipeline halted after a fatal stage failure");
    }
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or a fatal pipeline halt
async fn shutdown_signal(halted: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
        _ = halted.cancelled() => {
            info!("Pipeline halted");
        },
    }
}
