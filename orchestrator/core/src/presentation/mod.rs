// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`vigil-core`)
//!
//! HTTP surface that translates operator requests into application service
//! calls. No pipeline logic lives here; everything is delegated to
//! [`crate::application::directive::DirectiveService`].
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | directive submission, strategy status, ledger export |

pub mod api;
