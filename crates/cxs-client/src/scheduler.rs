// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single consumer of the event queue.
//!
//! The scheduler loops through `WaitingForFirst -> FillingBatch -> Sending` until the
//! shutdown signal is observed, then drains the queue and stops:
//!
//! - **WaitingForFirst** waits up to one send interval for a record. An empty queue at the
//!   end of the interval is an idle tick.
//! - **FillingBatch** takes whatever else is resident, up to `max_batch_size`, without
//!   waiting.
//! - **Sending** posts the batch as one request. A failed batch goes back to the queue tail
//!   and the scheduler backs off before the next cycle.
//! - **Draining** sends what is left. A batch that fails now is logged instead of requeued,
//!   and anything still resident after the loop is logged as orphaned.
//!
//! While a batch is on the wire its records sit in a shared in-flight slot, so the shutdown
//! coordinator can still account for them if it has to abort this task.

use crate::config::ClientConfig;
use crate::queue::{EventQueue, Pending};
use crate::record::Record;
use crate::recorder::{UnsentEventRecorder, UnsentReason};
use crate::retry::RetryStrategy;
use crate::transport::{FailureKind, SendOutcome, Transport};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Records of the batch currently being sent.
pub type InFlight<R> = Arc<Mutex<Vec<Pending<R>>>>;

pub(crate) fn lock_in_flight<R>(slot: &Mutex<Vec<Pending<R>>>) -> MutexGuard<'_, Vec<Pending<R>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
}

#[derive(Debug, PartialEq, Eq)]
enum BatchOutcome {
    /// Delivered, rejected or otherwise settled; nothing left to retry.
    Settled,
    /// The batch failed; `attempts` is the highest attempt count among its records.
    Failed { attempts: u32 },
}

pub struct BatchScheduler<R> {
    queue: Arc<EventQueue<R>>,
    transport: Arc<dyn Transport>,
    recorder: Arc<UnsentEventRecorder>,
    shutdown: CancellationToken,
    in_flight: InFlight<R>,
    max_batch_size: usize,
    send_interval: Duration,
    retry: RetryStrategy,
}

impl<R: Record> BatchScheduler<R> {
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        queue: Arc<EventQueue<R>>,
        transport: Arc<dyn Transport>,
        recorder: Arc<UnsentEventRecorder>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            transport,
            recorder,
            shutdown,
            in_flight: Arc::new(Mutex::new(Vec::new())),
            max_batch_size: config.max_batch_size.max(1),
            send_interval: config.send_interval,
            retry: config.retry,
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> InFlight<R> {
        Arc::clone(&self.in_flight)
    }

    /// Runs until the shutdown signal is observed and the queue has been drained.
    pub async fn run(self) {
        debug!(
            "Batch scheduler started: max_batch_size={}, send_interval={:?}",
            self.max_batch_size, self.send_interval
        );

        loop {
            let first = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                first = self.queue.dequeue_blocking(self.send_interval) => first,
            };
            let Some(first) = first else {
                trace!("Idle tick, queue empty");
                continue;
            };

            let batch = self.fill(first);
            if let BatchOutcome::Failed { attempts } = self.send(batch, Phase::Running).await {
                let delay = self.retry.backoff.delay(attempts, self.send_interval);
                debug!("Backing off {delay:?} before the next batch");
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.drain().await;
        debug!("Batch scheduler stopped");
    }

    fn fill(&self, first: Pending<R>) -> Vec<Pending<R>> {
        let mut batch = Vec::with_capacity(self.max_batch_size.min(self.queue.size() + 1));
        batch.push(first);
        while batch.len() < self.max_batch_size {
            match self.queue.dequeue_nonblocking() {
                Some(pending) => batch.push(pending),
                None => break,
            }
        }
        batch
    }

    async fn send(&self, batch: Vec<Pending<R>>, phase: Phase) -> BatchOutcome {
        let mut payloads = Vec::with_capacity(batch.len());
        let mut sendable = Vec::with_capacity(batch.len());
        for pending in batch {
            match pending.record.to_payload() {
                Ok(payload) => {
                    payloads.push(payload);
                    sendable.push(pending);
                }
                Err(e) => {
                    error!("Failed to serialize event {}: {e}", pending.record.id());
                    self.log(&pending, &Value::Null, UnsentReason::Construction);
                }
            }
        }
        if sendable.is_empty() {
            return BatchOutcome::Settled;
        }

        debug!("Sending batch of {} events", sendable.len());
        *lock_in_flight(&self.in_flight) = sendable;
        let outcome = self.transport.send_many(&payloads).await;
        let batch = std::mem::take(&mut *lock_in_flight(&self.in_flight));

        match outcome {
            SendOutcome::Delivered => {
                debug!("Delivered batch of {} events", batch.len());
                BatchOutcome::Settled
            }
            SendOutcome::NonRetryable(detail) if detail.kind != FailureKind::Unexpected => {
                warn!("Batch of {} events rejected: {detail}", batch.len());
                for (pending, payload) in batch.iter().zip(&payloads) {
                    self.log(pending, payload, UnsentReason::NonRetryableHttp);
                }
                BatchOutcome::Settled
            }
            SendOutcome::Retryable(detail) | SendOutcome::NonRetryable(detail) => {
                if detail.kind == FailureKind::Unexpected {
                    error!(
                        "Unexpected error sending batch of {} events, retrying: {detail}",
                        batch.len()
                    );
                }
                match phase {
                    Phase::Running => self.requeue(batch, &payloads),
                    Phase::Draining => {
                        warn!("Final batch of {} events failed: {detail}", batch.len());
                        for (pending, payload) in batch.iter().zip(&payloads) {
                            self.log(pending, payload, UnsentReason::ShutdownFinalBatchFailed);
                        }
                        BatchOutcome::Failed {
                            attempts: batch.iter().map(|p| p.attempts + 1).max().unwrap_or(1),
                        }
                    }
                }
            }
        }
    }

    fn requeue(&self, batch: Vec<Pending<R>>, payloads: &[Value]) -> BatchOutcome {
        let mut attempts = 1;
        for (mut pending, payload) in batch.into_iter().zip(payloads) {
            pending.attempts = pending.attempts.saturating_add(1);
            attempts = attempts.max(pending.attempts);
            if self.retry.is_exhausted(pending.attempts) {
                self.log(&pending, payload, UnsentReason::MaxRetriesExceeded);
            } else {
                self.log(&pending, payload, UnsentReason::BatchSendFailedRequeued);
                self.queue.requeue(pending);
            }
        }
        BatchOutcome::Failed { attempts }
    }

    async fn drain(&self) {
        if !self.queue.is_empty() {
            info!("Draining {} queued events", self.queue.size());
        }
        while let Some(first) = self.queue.dequeue_nonblocking() {
            let batch = self.fill(first);
            if let BatchOutcome::Failed { .. } = self.send(batch, Phase::Draining).await {
                break;
            }
        }

        for pending in self.queue.drain() {
            self.recorder
                .record_unsent(&pending.record, UnsentReason::ShutdownOrphaned);
        }
    }

    fn log(&self, pending: &Pending<R>, payload: &Value, reason: UnsentReason) {
        self.recorder
            .record(reason.level(), pending.record.id(), payload, reason);
    }
}
