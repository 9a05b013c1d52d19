// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use vigil_core::domain::node_config::{StorageBackend, VerificationConfig, VigilConfig, WorkerConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Print the resolved manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { yaml } => show(config_override, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
    }
}

fn show(config_override: Option<PathBuf>, as_yaml: bool) -> Result<()> {
    let config = VigilConfig::load_or_default(config_override).context("Failed to load configuration")?;

    if as_yaml {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();
    print!("{}", describe(&config));
    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = VigilConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

/// Human-readable summary of the sections operators usually check
pub fn describe(config: &VigilConfig) -> String {
    let spec = &config.spec;
    let mut out = String::new();

    out.push_str(&format!("Node: {}\n", config.metadata.name));
    match spec.storage.backend {
        StorageBackend::Sled => out.push_str(&format!("Storage: sled at {}\n", spec.storage.data_dir.display())),
        StorageBackend::Memory => out.push_str("Storage: memory (not durable)\n"),
    }
    out.push_str(&format!(
        "Bus: visibility {:?}, poll {:?}\n",
        spec.bus.visibility_timeout, spec.bus.poll_interval
    ));
    out.push_str(&format!(
        "Router: budget ceiling {:.2}, medium complexity threshold {:.2}\n",
        spec.router.budget_ceiling, spec.router.medium_complexity_threshold
    ));
    out.push_str(&format!(
        "Retry: base timeout {:?}, {} retries, multipliers {:?}\n",
        spec.retry.base_timeout, spec.retry.max_retries, spec.retry.multipliers
    ));
    out.push_str(&format!(
        "Engine: {} workers per wave, at most {} tasks per strategy\n",
        spec.engine.worker_pool_size, spec.dag.max_tasks
    ));
    for (tier, worker) in [("local", &spec.workers.local), ("cloud", &spec.workers.cloud)] {
        out.push_str(&format!("Worker {}: {}\n", tier, describe_worker(worker)));
    }
    let verification = match &spec.verification {
        VerificationConfig::Static { passed } => format!("static ({})", if *passed { "pass" } else { "fail" }),
        VerificationConfig::Command { program, args, .. } => format!("command `{} {}`", program, args.join(" ")),
    };
    out.push_str(&format!("Verification: {}\n", verification));
    out.push_str(&format!("API: {}:{}\n", spec.api.bind_address, spec.api.port));
    out
}

fn describe_worker(worker: &WorkerConfig) -> String {
    match worker {
        WorkerConfig::Stub { name, fail_keys, .. } if fail_keys.is_empty() => format!("stub '{}'", name),
        WorkerConfig::Stub { name, fail_keys, .. } => format!("stub '{}' failing on {}", name, fail_keys.join(", ")),
        WorkerConfig::Ollama { endpoint, model, .. } => format!("ollama {} at {}", model, endpoint),
        WorkerConfig::OpenAI { endpoint, model, .. } => format!("openai {} at {}", model, endpoint),
    }
}
