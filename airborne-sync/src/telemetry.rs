// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Telemetry events
//!
//! The core reports notable events to a [`TelemetrySink`] but never depends
//! on it: sink failures are logged at debug level and dropped.

use std::fmt;

use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for TelemetryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryLevel::Debug => "debug",
            TelemetryLevel::Info => "info",
            TelemetryLevel::Warning => "warning",
            TelemetryLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A structured event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub category: String,
    pub subcategory: String,
    pub level: TelemetryLevel,
    pub label: String,
    pub message: String,
    pub exception: Option<String>,
}

impl TelemetryEvent {
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        level: TelemetryLevel,
        label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            level,
            label: label.into(),
            message: message.into(),
            exception: None,
        }
    }

    /// Attaches the error that caused this event.
    pub fn with_exception(mut self, exception: impl fmt::Display) -> Self {
        self.exception = Some(exception.to_string());
        self
    }
}

#[derive(Debug, Error)]
#[error("Telemetry sink failed: {0}")]
pub struct TelemetryError(pub String);

/// Receiver of [`TelemetryEvent`]s.
pub trait TelemetrySink: Send + Sync {
    fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let exception = event.exception.as_deref().unwrap_or("");
        match event.level {
            TelemetryLevel::Debug => debug!(
                category = %event.category,
                subcategory = %event.subcategory,
                label = %event.label,
                exception,
                "{}",
                event.message
            ),
            TelemetryLevel::Info => info!(
                category = %event.category,
                subcategory = %event.subcategory,
                label = %event.label,
                exception,
                "{}",
                event.message
            ),
            TelemetryLevel::Warning => warn!(
                category = %event.category,
                subcategory = %event.subcategory,
                label = %event.label,
                exception,
                "{}",
                event.message
            ),
            TelemetryLevel::Error => error!(
                category = %event.category,
                subcategory = %event.subcategory,
                label = %event.label,
                exception,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Sends `event` to `sink`, swallowing failures.
pub(crate) fn emit(sink: &dyn TelemetrySink, event: TelemetryEvent) {
    if let Err(e) = sink.track(&event) {
        debug!(label = %event.label, "telemetry dropped: {}", e);
    }
}
