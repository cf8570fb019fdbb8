// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced to callers of the client.
///
/// Transient delivery failures are never reported through this type: they are absorbed by
/// the retry path or written to the unsent-event log.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to construct event: {0}")]
    Construction(String),

    #[error("Client is closed")]
    Closed,
}
