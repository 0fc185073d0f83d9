// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tagged request registry
//!
//! Every call is registered under a tag before it waits for a network
//! permit. The registry lock covers registration, the queued to executing
//! transition, cancellation and the final completion step, so a cancel is
//! observed by exactly one side: either the call sees it and never
//! completes, or the call completed first and the cancel reports
//! [`CancelOutcome::NotFound`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Lifecycle of a registered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Waiting for a concurrency permit.
    Queued,
    /// On the network.
    Executing,
}

/// Result of [`FetchOrchestrator::cancel`](crate::FetchOrchestrator::cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The call was queued or executing and will not complete.
    Cancelled,
    /// No outstanding call carries this tag.
    NotFound,
    /// The registry could not be consulted.
    CancelError,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("A request tagged '{0}' is already outstanding")]
    DuplicateTag(String),

    #[error("Request registry lock poisoned")]
    Poisoned,
}

struct Entry {
    id: u64,
    state: CallState,
    cancel: watch::Sender<bool>,
}

pub(crate) struct Dispatcher {
    permits: Arc<Semaphore>,
    calls: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a queued call under `tag`.
    pub(crate) fn register(&self, tag: &str) -> Result<Call<'_>, DispatchError> {
        let mut calls = self.lock()?;
        if calls.contains_key(tag) {
            return Err(DispatchError::DuplicateTag(tag.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = watch::channel(false);
        calls.insert(
            tag.to_string(),
            Entry {
                id,
                state: CallState::Queued,
                cancel,
            },
        );

        Ok(Call {
            dispatcher: self,
            tag: tag.to_string(),
            id,
            cancelled,
            _permit: None,
        })
    }

    pub(crate) fn cancel(&self, tag: &str) -> CancelOutcome {
        let mut calls = match self.calls.lock() {
            Ok(calls) => calls,
            Err(_) => {
                warn!(tag, "cannot cancel: request registry poisoned");
                return CancelOutcome::CancelError;
            }
        };

        match calls.remove(tag) {
            Some(entry) => {
                entry.cancel.send_replace(true);
                debug!(tag, state = ?entry.state, "request cancelled");
                CancelOutcome::Cancelled
            }
            None => CancelOutcome::NotFound,
        }
    }

    pub(crate) fn state(&self, tag: &str) -> Option<CallState> {
        self.calls.lock().ok()?.get(tag).map(|entry| entry.state)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, DispatchError> {
        self.calls.lock().map_err(|_| DispatchError::Poisoned)
    }
}

/// A registered call. Dropping it deregisters the tag.
pub(crate) struct Call<'a> {
    dispatcher: &'a Dispatcher,
    tag: String,
    id: u64,
    cancelled: watch::Receiver<bool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Call<'_> {
    /// Waits for a concurrency permit, then moves to [`CallState::Executing`].
    pub(crate) async fn admit(&mut self) -> Result<(), DispatchError> {
        let permit = tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.cancelled) => return Err(DispatchError::Cancelled),
            permit = self.dispatcher.permits.clone().acquire_owned() => {
                permit.map_err(|_| DispatchError::Cancelled)?
            }
        };

        let mut calls = self.dispatcher.lock()?;
        match calls.get_mut(&self.tag) {
            Some(entry) if entry.id == self.id => entry.state = CallState::Executing,
            _ => return Err(DispatchError::Cancelled),
        }
        drop(calls);

        self._permit = Some(permit);
        Ok(())
    }

    /// Runs `fut` until it finishes or the call is cancelled.
    pub(crate) async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output, DispatchError> {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.cancelled) => Err(DispatchError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Runs `finish` under the registry lock unless the call was cancelled,
    /// then deregisters it.
    pub(crate) fn complete<T>(self, finish: impl FnOnce() -> T) -> Result<T, DispatchError> {
        let mut calls = self.dispatcher.lock()?;
        match calls.get(&self.tag) {
            Some(entry) if entry.id == self.id => {}
            _ => return Err(DispatchError::Cancelled),
        }

        let out = finish();
        calls.remove(&self.tag);
        Ok(out)
    }

    /// Deregisters a call that failed with `err`. A cancel that got in first
    /// wins, so the caller and the canceller agree on the outcome.
    pub(crate) fn fail<E: From<DispatchError>>(self, err: E) -> E {
        match self.complete(|| ()) {
            Err(DispatchError::Cancelled) => DispatchError::Cancelled.into(),
            _ => err,
        }
    }
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.dispatcher.calls.lock() {
            if calls.get(&self.tag).is_some_and(|entry| entry.id == self.id) {
                calls.remove(&self.tag);
            }
        }
    }
}

/// Resolves once the call is cancelled; pends forever otherwise.
async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    if cancelled.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
