// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP transport
//!
//! The orchestrator talks to the network through [`HttpTransport`]. The
//! production implementation, [`ReqwestTransport`], shares one pooled
//! `reqwest::Client` whose TLS trust is delegated to a
//! [`TrustEvaluator`](crate::trust::TrustEvaluator).

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::config::{EffectiveConfig, SyncConfig};
use crate::trust::{tls_client_config, TrustEvaluator};

/// Response body, delivered chunk by chunk.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A GET, optionally conditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            if_none_match: None,
            if_modified_since: None,
        }
    }

    /// True when the server may answer `304 Not Modified`.
    pub fn sends_validators(&self) -> bool {
        self.if_none_match.is_some() || self.if_modified_since.is_some()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The server answered.
    Network,
    /// A transport-level cache answered without any round-trip.
    LocalCache,
}

pub struct FetchResponse {
    pub status: u16,
    pub source: ResponseSource,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: BodyStream,
}

impl FetchResponse {
    /// A network response with an in-memory body.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let chunks: BodyStream = if body.is_empty() {
            Box::pin(stream::empty())
        } else {
            Box::pin(stream::iter([Ok(body)]))
        };
        Self {
            status,
            source: ResponseSource::Network,
            etag: None,
            last_modified: None,
            body: chunks,
        }
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_body(mut self, body: BodyStream) -> Self {
        self.body = body;
        self
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("source", &self.source)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server certificate chain was rejected.
    #[error("TLS trust failure: {0}")]
    Trust(String),

    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Issues GET requests on behalf of the orchestrator.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` under the timeouts in `config`. Body chunks are
    /// subject to the read timeout.
    async fn get(
        &self,
        request: FetchRequest,
        config: &EffectiveConfig,
    ) -> Result<FetchResponse, TransportError>;
}

/// [`HttpTransport`] over a shared, pinned `reqwest::Client`.
///
/// The client carries no timeouts of its own, so every call is bounded only
/// by its [`EffectiveConfig`]. Connection setup (TCP and TLS) and the wait
/// for response headers share one budget, [`EffectiveConfig::send_deadline`];
/// reqwest offers no per-request hook to bound the connect phase alone.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the shared client. Only identity and scheme policy come from
    /// the baseline; timeouts are applied per call.
    pub fn new(
        config: &SyncConfig,
        evaluator: Arc<dyn TrustEvaluator>,
    ) -> Result<Self, TransportError> {
        let tls = tls_client_config(evaluator).map_err(|e| TransportError::Trust(e.to_string()))?;

        let client = Client::builder()
            .use_preconfigured_tls(tls)
            .user_agent(config.user_agent.clone())
            .https_only(!config.allow_plain_http)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        request: FetchRequest,
        config: &EffectiveConfig,
    ) -> Result<FetchResponse, TransportError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(etag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(since) = &request.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }

        let response = tokio::time::timeout(config.send_deadline(), builder.send())
            .await
            .map_err(|_| TransportError::Timeout("waiting for response headers"))?
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let etag = header_string(response.headers(), ETAG);
        let last_modified = header_string(response.headers(), LAST_MODIFIED);
        let body = timed_body(response.bytes_stream(), config.read_timeout);

        Ok(FetchResponse {
            status,
            source: ResponseSource::Network,
            etag,
            last_modified,
            body,
        })
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Applies `read_timeout` to every chunk of `body`.
fn timed_body<S>(body: S, read_timeout: Duration) -> BodyStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let body = Box::pin(body);
    Box::pin(stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(read_timeout, body.next()).await {
            Err(_) => Some((Err(TransportError::Timeout("reading response body")), None)),
            Ok(None) => None,
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(classify_error(e)), None)),
        }
    }))
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if is_trust_failure(&err) {
        TransportError::Trust(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout("talking to the server")
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Walks the source chain looking for a rejected certificate. rustls errors
/// surface wrapped in `io::Error`, whose `source()` skips the wrapped value.
fn is_trust_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            if matches!(
                tls,
                rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
            ) {
                return true;
            }
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if let Some(inner) = io_err.get_ref() {
                if is_trust_failure(inner) {
                    return true;
                }
            }
        }
        current = e.source();
    }
    false
}
