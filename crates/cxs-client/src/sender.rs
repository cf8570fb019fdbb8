// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::queue::{Admission, EventQueue, OverflowPolicy};
use crate::record::Record;
use crate::recorder::{UnsentEventRecorder, UnsentReason};
use crate::transport::{FailureKind, SendOutcome, Transport};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Where a record ended up when `send` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// Waiting in the queue for the batch scheduler.
    Queued,
    /// Written to the unsent-event log.
    Logged(UnsentReason),
}

/// Makes one immediate delivery attempt per record and hands transient failures to the
/// queue.
pub struct DirectSender<R> {
    transport: Arc<dyn Transport>,
    queue: Arc<EventQueue<R>>,
    recorder: Arc<UnsentEventRecorder>,
    shutdown: CancellationToken,
}

impl<R: Record> DirectSender<R> {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: Arc<EventQueue<R>>,
        recorder: Arc<UnsentEventRecorder>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            queue,
            recorder,
            shutdown,
        }
    }

    /// Sends `record` once. Never retries inline and never returns an error: every record
    /// is delivered, queued or logged before this returns.
    pub async fn send(&self, record: R) -> DeliveryStatus {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize event {}: {e}", record.id());
                return self.log(&record, &Value::Null, UnsentReason::Construction);
            }
        };

        match self.transport.send_one(&payload).await {
            SendOutcome::Delivered => {
                debug!("Delivered event {}", record.id());
                DeliveryStatus::Delivered
            }
            SendOutcome::Retryable(detail) => {
                debug!("Queueing event {} after {detail}", record.id());
                self.park(record, &payload).await
            }
            SendOutcome::NonRetryable(detail) if detail.kind == FailureKind::Unexpected => {
                error!("Unexpected error sending event {}: {detail}", record.id());
                self.log(&record, &payload, UnsentReason::UnexpectedSend)
            }
            SendOutcome::NonRetryable(detail) => {
                warn!("Event {} rejected: {detail}", record.id());
                self.log(&record, &payload, UnsentReason::NonRetryableHttp)
            }
        }
    }

    /// Hands the record to the queue, or to the log once nothing will drain the queue.
    async fn park(&self, record: R, payload: &Value) -> DeliveryStatus {
        if self.shutdown.is_cancelled() {
            return self.log(&record, payload, UnsentReason::ShutdownOrphaned);
        }

        let refused_incoming = self.queue.overflow_policy() == OverflowPolicy::DropNewest;
        match self.queue.enqueue(record).await {
            Admission::Accepted => DeliveryStatus::Queued,
            Admission::Closed(record) => self.log(&record, payload, UnsentReason::ShutdownOrphaned),
            Admission::Displaced(displaced) => {
                self.recorder
                    .record_unsent(&displaced, UnsentReason::QueueOverflow);
                if refused_incoming {
                    DeliveryStatus::Logged(UnsentReason::QueueOverflow)
                } else {
                    DeliveryStatus::Queued
                }
            }
        }
    }

    fn log(&self, record: &R, payload: &Value, reason: UnsentReason) -> DeliveryStatus {
        self.recorder
            .record(reason.level(), record.id(), payload, reason);
        DeliveryStatus::Logged(reason)
    }
}
