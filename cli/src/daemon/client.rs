// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_core::application::directive::StrategyStatusView;
use vigil_core::domain::Severity;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AcceptedResponse {
    strategy_id: Uuid,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn health(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .with_context(|| format!("Daemon unreachable at {}", self.base_url))?;
        Ok(response.status().is_success())
    }

    pub async fn submit_directive(&self, directive: &str, severity: Severity) -> Result<Uuid> {
        #[derive(Serialize)]
        struct DirectiveRequest<'a> {
            directive: &'a str,
            severity: Severity,
        }

        let response = self
            .client
            .post(format!("{}/api/directives", self.base_url))
            .json(&DirectiveRequest { directive, severity })
            .send()
            .await
            .context("Failed to submit directive")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to submit directive: {}", error_text);
        }

        let accepted: AcceptedResponse = response.json().await.context("Failed to parse submit response")?;
        Ok(accepted.strategy_id)
    }

    /// `None` while the strategy has not been planned yet
    pub async fn strategy(&self, id: Uuid) -> Result<Option<StrategyStatusView>> {
        let response = self
            .client
            .get(format!("{}/api/strategies/{}", self.base_url, id))
            .send()
            .await
            .context("Failed to get strategy")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to get strategy: {}", error_text);
        }

        Ok(Some(response.json().await.context("Failed to parse strategy response")?))
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<StrategyStatusView>> {
        #[derive(Deserialize)]
        struct RecentResponse {
            strategies: Vec<StrategyStatusView>,
        }

        let response = self
            .client
            .get(format!("{}/api/strategies", self.base_url))
            .query(&[("limit", limit)])
            .send()
            .await
            .context("Failed to list strategies")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list strategies: {}", error_text);
        }

        let recent: RecentResponse = response.json().await.context("Failed to parse strategy list")?;
        Ok(recent.strategies)
    }

    /// Raw export body in the requested format
    pub async fn ledger(&self, format: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/ledger", self.base_url))
            .query(&[("format", format)])
            .send()
            .await
            .context("Failed to export ledger")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to export ledger: {}", error_text);
        }

        response.text().await.context("Failed to read ledger export")
    }
}
