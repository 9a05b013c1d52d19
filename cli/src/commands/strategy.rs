// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Directive and strategy commands, delegated to a running daemon

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use uuid::Uuid;

use vigil_core::application::directive::StrategyStatusView;
use vigil_core::domain::strategy::StrategyStatus;
use vigil_core::domain::task::TaskStatus;
use vigil_core::domain::Severity;

use crate::daemon::client::DaemonClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedgerFormat {
    Json,
    Csv,
}

impl LedgerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerFormat::Json => "json",
            LedgerFormat::Csv => "csv",
        }
    }
}

pub async fn submit(server: &str, directive: &str, severity: Severity) -> Result<()> {
    let client = DaemonClient::new(server)?;
    let id = client.submit_directive(directive, severity).await?;
    println!("{}", "✓ Directive accepted".green());
    println!("  Strategy: {}", id);
    println!("  Follow with: vigil status {}", id);
    Ok(())
}

pub async fn status(server: &str, id: Uuid) -> Result<()> {
    let client = DaemonClient::new(server)?;
    match client.strategy(id).await? {
        Some(view) => print!("{}", render(&view)),
        None => println!("{}", format!("Strategy {} is not planned yet", id).yellow()),
    }
    Ok(())
}

pub async fn list(server: &str, limit: usize) -> Result<()> {
    let client = DaemonClient::new(server)?;
    let views = client.recent(limit).await?;
    if views.is_empty() {
        println!("{}", "No strategies yet".dimmed());
    }
    for view in &views {
        println!(
            "{}  {:<10} {:<9} {} task(s)",
            view.strategy_id,
            colored_status(view.status),
            view.severity,
            view.tasks.len()
        );
    }
    Ok(())
}

pub async fn ledger(server: &str, format: LedgerFormat) -> Result<()> {
    let client = DaemonClient::new(server)?;
    print!("{}", client.ledger(format.as_str()).await?);
    Ok(())
}

fn colored_status(status: StrategyStatus) -> String {
    let label = format!("{:?}", status).to_lowercase();
    match status {
        StrategyStatus::Completed => label.green().to_string(),
        StrategyStatus::Failed => label.red().to_string(),
        _ => label.yellow().to_string(),
    }
}

/// Multi-line status report for one strategy
pub fn render(view: &StrategyStatusView) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {}\n", "Strategy".bold(), view.strategy_id));
    out.push_str(&format!("  Status:   {}\n", colored_status(view.status)));
    out.push_str(&format!("  Severity: {}\n", view.severity));
    out.push_str(&format!("  Updated:  {}\n", view.updated_at.to_rfc3339()));
    out.push_str(&format!("  Tasks ({}):\n", view.tasks.len()));
    for task in &view.tasks {
        let marker = match task.status {
            TaskStatus::Completed => "✓".green().to_string(),
            TaskStatus::Failed => "✗".red().to_string(),
            TaskStatus::Cancelled => "-".dimmed().to_string(),
            TaskStatus::Pending | TaskStatus::Dispatched => "…".yellow().to_string(),
        };
        out.push_str(&format!("    {} {} [{}] {}\n", marker, task.key, task.tier, task.status));
        if let Some(error) = &task.error {
            out.push_str(&format!("        {}\n", error.dimmed()));
        }
    }
    if let Some(verification) = &view.verification {
        let verdict = if verification.passed { "passed".green() } else { "failed".red() };
        out.push_str(&format!("  Verification: {} ({})\n", verdict, verification.detail));
        for check in &verification.failing_checks {
            out.push_str(&format!("    ✗ {}\n", check));
        }
    }
    out
}
