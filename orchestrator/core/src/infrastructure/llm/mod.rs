// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the domain `LLMProvider` port and one
// external completion API. Model-backed workers hold one adapter each.

pub mod openai;
pub mod ollama;

pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;

/// Shared client timeouts for provider calls; the retry policy bounds each attempt separately.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
