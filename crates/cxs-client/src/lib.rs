// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # CXS client
//!
//! Client-side delivery pipeline for CXS semantic events.
//!
//! Producers hand records to the pipeline, which tries to deliver each one immediately and
//! falls back to a batched retry path when the collection endpoint is unavailable. Records
//! that cannot be delivered are written to an append-only unsent-event log, so nothing that
//! enters the pipeline is silently dropped.
//!
//! ## Architecture
//!
//! ```text
//!   producer ──> DirectSender ──> Transport ──> endpoint
//!                    │  retryable
//!                    v
//!               EventQueue ──> BatchScheduler ──> Transport
//!                    ^               │ failed batch
//!                    └───────────────┘
//!                                    │ terminal / shutdown
//!                                    v
//!                           UnsentEventRecorder
//! ```
//!
//! - [`sender`]: one immediate delivery attempt per record
//! - [`queue`]: FIFO buffer of records awaiting batched (re)delivery
//! - [`scheduler`]: the single background task forming and sending batches
//! - [`transport`]: HTTP POST and failure classification
//! - [`recorder`]: durable log of records that were not delivered
//! - [`pipeline`]: ownership of all of the above and the shutdown protocol
//! - [`client`]: semantic event API (`track`, `identify`, `page`, `screen`)

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod recorder;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod transport;

pub use client::{CxsClient, Receipt};
pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{Event, EventBuilder, EventLink};
pub use pipeline::{Pipeline, ShutdownOutcome};
pub use record::{JsonRecord, Record};
pub use recorder::UnsentReason;
pub use sender::DeliveryStatus;
pub use transport::{HttpTransport, SendOutcome, Transport};

/// Library name reported in every event's `library` block.
pub const CLIENT_NAME: &str = "rust-cxs-client";

/// Library version reported in every event's `library` block.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
