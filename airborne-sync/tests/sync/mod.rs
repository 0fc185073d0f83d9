// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for asset synchronization
//!
//! Scenarios:
//! - First download and conditional revalidation of config.json
//! - Cancellation of queued and executing requests
//! - Crash recovery of interrupted commits
//! - Pinned trust through the rustls verifier
//! - Pinned downloads from a local HTTPS server

mod cancellation_tests;
mod orchestrator_tests;
mod store_tests;
