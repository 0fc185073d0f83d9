// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset fetching
//!
//! - [`transport`]: HTTP over pinned TLS
//! - [`decision`]: Hit / ConditionalHit / Miss classification
//! - [`dispatcher`]: tagged, cancellable request registry
//! - [`orchestrator`]: the synchronize / cancel / invalidate surface

pub mod decision;
pub mod dispatcher;
pub mod orchestrator;
pub mod transport;

pub use decision::{classify, CacheDecision};
pub use dispatcher::{CallState, CancelOutcome, DispatchError};
pub use orchestrator::{FetchOrchestrator, RecoveryReport, SyncError, SyncOutcome, SyncRequest};
pub use transport::{
    BodyStream, FetchRequest, FetchResponse, HttpTransport, ReqwestTransport, ResponseSource,
    TransportError,
};
