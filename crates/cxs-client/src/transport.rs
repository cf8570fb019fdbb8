// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized records to the collection endpoint.
//!
//! A transport performs exactly one HTTP POST per call and reports one of three outcomes:
//!
//! | Result | Outcome |
//! |--------|---------|
//! | 2xx | `Delivered` |
//! | 500, 502, 503, 504, 429 | `Retryable` |
//! | any other 4xx | `NonRetryable` (status) |
//! | any other status | `NonRetryable` (unexpected) |
//! | timeout, connect, DNS, refused, reset | `Retryable` |
//! | any other client error | `NonRetryable` (unexpected) |
//!
//! Unknown failure modes are never retried from the direct path. The batch scheduler treats
//! `Unexpected` failures like retryable ones so a batch is never lost to a misclassified
//! error.

use crate::config::{AuthScheme, ClientConfig};
use crate::http::get_client;
use async_trait::async_trait;
use derive_more::Display;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Request body: one JSON object, or a JSON array for a batch.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Payload<'a> {
    Single(&'a Value),
    Batch(&'a [Value]),
}

impl Payload<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureKind {
    /// The endpoint answered with a non-success status.
    #[display("status")]
    Status,
    /// The request never got a response: timeout, DNS, refused or reset connection.
    #[display("connection")]
    Connection,
    /// The record could not be turned into a payload.
    #[display("serialization")]
    Serialization,
    /// Anything the classification does not recognize.
    #[display("unexpected")]
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl FailureDetail {
    #[must_use]
    pub fn new(kind: FailureKind, status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(error: &serde_json::Error) -> Self {
        Self::new(FailureKind::Serialization, None, error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Retryable(FailureDetail),
    NonRetryable(FailureDetail),
}

impl SendOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one POST of the payload.
    async fn send(&self, payload: Payload<'_>) -> SendOutcome;

    /// Posts a single record as a JSON object.
    async fn send_one(&self, record: &Value) -> SendOutcome {
        self.send(Payload::Single(record)).await
    }

    /// Posts several records as one JSON array.
    async fn send_many(&self, records: &[Value]) -> SendOutcome {
        self.send(Payload::Batch(records)).await
    }
}

/// Transport posting JSON to the configured endpoint with the write key as credentials.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    write_key: String,
    auth_scheme: AuthScheme,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: get_client(config),
            endpoint: config.endpoint.clone(),
            write_key: config.write_key.clone(),
            auth_scheme: config.auth_scheme,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn create_request(&self, payload: &Payload<'_>) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(payload);
        match self.auth_scheme {
            AuthScheme::Basic => request.basic_auth(&self.write_key, Some(&self.write_key)),
            AuthScheme::Bearer => request.bearer_auth(&self.write_key),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Payload<'_>) -> SendOutcome {
        let count = payload.len();
        let time = Instant::now();
        let resp = self.create_request(&payload).send().await;
        let elapsed = time.elapsed();

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    debug!(
                        "Delivered {count} events in {} ms with status {status}",
                        elapsed.as_millis()
                    );
                    return SendOutcome::Delivered;
                }
                // Only read the body on failure, for diagnostics
                let body = resp.text().await.unwrap_or_default();
                error!("{status}: Failed to push {count} events: {body:?}");
                classify_status(status, body)
            }
            Err(e) => {
                let outcome = classify_error(&e);
                error!(
                    "Failed to push {count} events after {} ms: {e}",
                    elapsed.as_millis()
                );
                outcome
            }
        }
    }
}

/// Maps a non-success status to an outcome.
#[must_use]
pub fn classify_status(status: StatusCode, body: String) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered;
    }
    let detail = |kind| FailureDetail::new(kind, Some(status), body.clone());
    match status {
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => SendOutcome::Retryable(detail(FailureKind::Status)),
        status if status.is_client_error() => {
            SendOutcome::NonRetryable(detail(FailureKind::Status))
        }
        status => {
            warn!("Unexpected status {status} from endpoint");
            SendOutcome::NonRetryable(detail(FailureKind::Unexpected))
        }
    }
}

fn classify_error(e: &reqwest::Error) -> SendOutcome {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SendOutcome::Retryable(FailureDetail::new(
            FailureKind::Connection,
            e.status(),
            e.to_string(),
        ))
    } else {
        SendOutcome::NonRetryable(FailureDetail::new(
            FailureKind::Unexpected,
            e.status(),
            e.to_string(),
        ))
    }
}
