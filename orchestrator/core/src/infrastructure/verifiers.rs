// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verifier Implementations
//!
//! - [`CommandVerifier`] runs the project's full test command and reports
//!   every `test <name> ... FAILED` line as a failing check.
//! - [`StaticVerifier`] returns a fixed verdict.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::node_config::VerificationConfig;
use crate::domain::strategy::Strategy;
use crate::domain::task::ExecutionReport;
use crate::domain::verification::{Verifier, VerifierError, VerifierOutcome};

static FAILED_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test (\S+) \.\.\. FAILED").expect("failed-test pattern is a valid regex"));

/// Returns the same verdict for every strategy
pub struct StaticVerifier {
    passed: bool,
}

impl StaticVerifier {
    pub fn new(passed: bool) -> Self {
        Self { passed }
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(&self, _strategy: &Strategy, _report: &ExecutionReport) -> Result<VerifierOutcome, VerifierError> {
        Ok(if self.passed {
            VerifierOutcome {
                passed: true,
                detail: "static verdict: pass".to_string(),
                failing_checks: Vec::new(),
            }
        } else {
            VerifierOutcome {
                passed: false,
                detail: "static verdict: fail".to_string(),
                failing_checks: vec!["static".to_string()],
            }
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Runs an external test command; a non-zero exit is a failing run
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandVerifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn parse_failures(output: &str) -> Vec<String> {
        FAILED_TEST.captures_iter(output).map(|c| c[1].to_string()).collect()
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, strategy: &Strategy, _report: &ExecutionReport) -> Result<VerifierOutcome, VerifierError> {
        if self.program.trim().is_empty() {
            return Err(VerifierError::Misconfigured("verification program is empty".into()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(strategy_id = %strategy.id, program = %self.program, "Running verification command");
        let output = command
            .output()
            .await
            .map_err(|e| VerifierError::Infrastructure(format!("failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut failing_checks = Self::parse_failures(&stdout);
        failing_checks.extend(Self::parse_failures(&stderr));

        let passed = output.status.success() && failing_checks.is_empty();
        if !passed && failing_checks.is_empty() {
            failing_checks.push(format!("{} exited with {}", self.program, output.status));
        }

        info!(strategy_id = %strategy.id, passed, failing = failing_checks.len(), "Verification command finished");
        Ok(VerifierOutcome {
            passed,
            detail: format!("{} {} ({})", self.program, self.args.join(" "), output.status),
            failing_checks,
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

pub fn build_verifier(config: &VerificationConfig) -> Arc<dyn Verifier> {
    match config {
        VerificationConfig::Static { passed } => Arc::new(StaticVerifier::new(*passed)),
        VerificationConfig::Command { program, args, working_dir } => {
            let verifier = CommandVerifier::new(program.clone(), args.clone());
            Arc::new(match working_dir {
                Some(dir) => verifier.in_dir(dir.clone()),
                None => verifier,
            })
        }
    }
}
