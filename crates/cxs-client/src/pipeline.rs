// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ownership of the delivery components and the shutdown protocol.
//!
//! A [`Pipeline`] is constructed once per client. It owns the queue, the recorder, the
//! direct sender and the handle of the scheduler task, and it is the only place the
//! shutdown signal is set.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::queue::{Admission, EventQueue, OverflowPolicy};
use crate::record::Record;
use crate::recorder::{UnsentEventRecorder, UnsentReason};
use crate::scheduler::{lock_in_flight, BatchScheduler, InFlight};
use crate::sender::{DeliveryStatus, DirectSender};
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How `close` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The scheduler drained the queue and stopped on its own.
    Graceful,
    /// The scheduler missed the deadline and was aborted.
    Forced,
    /// A previous `close` already shut the pipeline down.
    AlreadyClosed,
}

pub struct Pipeline<R: Record> {
    queue: Arc<EventQueue<R>>,
    recorder: Arc<UnsentEventRecorder>,
    sender: DirectSender<R>,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    in_flight: InFlight<R>,
    shutdown_timeout: Duration,
}

impl<R: Record> Pipeline<R> {
    /// Starts a pipeline posting to the configured endpoint over HTTP.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::with_transport(config, Arc::new(HttpTransport::new(config)))
    }

    /// Starts a pipeline using `transport` for every request.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let queue = Arc::new(EventQueue::with_capacity(
            config.queue_capacity,
            config.overflow_policy,
        ));
        let recorder = Arc::new(UnsentEventRecorder::open(config.unsent_log_path.as_deref()));
        let shutdown = CancellationToken::new();

        let sender = DirectSender::new(
            Arc::clone(&transport),
            Arc::clone(&queue),
            Arc::clone(&recorder),
            shutdown.clone(),
        );
        let scheduler = BatchScheduler::new(
            config,
            Arc::clone(&queue),
            transport,
            Arc::clone(&recorder),
            shutdown.clone(),
        );
        let in_flight = scheduler.in_flight();
        let handle = tokio::spawn(scheduler.run());

        debug!("Delivery pipeline started for {}", config.endpoint);
        Ok(Self {
            queue,
            recorder,
            sender,
            shutdown,
            scheduler: Mutex::new(Some(handle)),
            in_flight,
            shutdown_timeout: config.effective_shutdown_timeout(),
        })
    }

    /// Attempts immediate delivery, queueing the record on a transient failure.
    ///
    /// Once the pipeline is closed the record is logged without a request being made.
    pub async fn send(&self, record: R) -> DeliveryStatus {
        if self.is_closed() {
            return self.orphan(&record);
        }
        self.sender.send(record).await
    }

    /// Puts the record straight on the queue for the next batch.
    pub async fn enqueue(&self, record: R) -> DeliveryStatus {
        if self.is_closed() {
            return self.orphan(&record);
        }
        match self.queue.enqueue(record).await {
            Admission::Accepted => DeliveryStatus::Queued,
            Admission::Closed(record) => self.orphan(&record),
            Admission::Displaced(displaced) => {
                self.recorder
                    .record_unsent(&displaced, UnsentReason::QueueOverflow);
                if self.queue.overflow_policy() == OverflowPolicy::DropNewest {
                    DeliveryStatus::Logged(UnsentReason::QueueOverflow)
                } else {
                    DeliveryStatus::Queued
                }
            }
        }
    }

    fn orphan(&self, record: &R) -> DeliveryStatus {
        self.recorder
            .record_unsent(record, UnsentReason::ShutdownOrphaned);
        DeliveryStatus::Logged(UnsentReason::ShutdownOrphaned)
    }

    #[must_use]
    pub fn queue(&self) -> &EventQueue<R> {
        &self.queue
    }

    #[must_use]
    pub fn recorder(&self) -> &UnsentEventRecorder {
        &self.recorder
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shuts down with the configured timeout.
    pub async fn close(&self) -> ShutdownOutcome {
        self.close_with_timeout(self.shutdown_timeout).await
    }

    /// Signals shutdown, waits up to `timeout` for the scheduler to drain the queue and
    /// stop, aborts it otherwise, and closes the recorder.
    ///
    /// When this returns no background task is running and every record still held by the
    /// pipeline has been written to the unsent-event log. A concurrent call waits for the
    /// first one to finish and then returns [`ShutdownOutcome::AlreadyClosed`].
    pub async fn close_with_timeout(&self, timeout: Duration) -> ShutdownOutcome {
        self.shutdown.cancel();

        // Held until the sweep is done.
        let mut scheduler = self.scheduler.lock().await;
        let Some(mut handle) = scheduler.take() else {
            debug!("Pipeline already closed");
            return ShutdownOutcome::AlreadyClosed;
        };

        let outcome = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => ShutdownOutcome::Graceful,
            Ok(Err(e)) => {
                warn!("Batch scheduler ended abnormally: {e}");
                ShutdownOutcome::Forced
            }
            Err(_) => {
                warn!("Batch scheduler did not stop within {timeout:?}, aborting");
                handle.abort();
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!("Batch scheduler failed while aborting: {e}");
                    }
                }
                ShutdownOutcome::Forced
            }
        };

        let in_flight = std::mem::take(&mut *lock_in_flight(&self.in_flight));
        let remaining = self.queue.close();
        let orphaned = in_flight.len() + remaining.len();
        for pending in in_flight.into_iter().chain(remaining) {
            self.recorder
                .record_unsent(&pending.record, UnsentReason::ShutdownOrphaned);
        }
        if orphaned > 0 {
            warn!("{orphaned} events were still pending at shutdown");
        }

        self.recorder.close();
        drop(scheduler);
        info!("Delivery pipeline closed: {outcome:?}");
        outcome
    }
}

impl<R: Record> Drop for Pipeline<R> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.scheduler.try_lock() {
            if let Some(handle) = guard.take() {
                warn!("Pipeline dropped without close, pending events may be lost");
                self.shutdown.cancel();
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{classify_status, Payload, SendOutcome};
    use crate::JsonRecord;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StatusTransport {
        status: StatusCode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StatusTransport {
        async fn send(&self, _payload: Payload<'_>) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            classify_status(self.status, String::new())
        }
    }

    /// Never answers, simulating a request stuck on the wire.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _payload: Payload<'_>) -> SendOutcome {
            std::future::pending().await
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            send_interval: Duration::from_millis(20),
            ..ClientConfig::new("key", "http://localhost/v1")
        }
    }

    fn record(id: &str) -> JsonRecord {
        JsonRecord::new(json!({"messageId": id})).expect("object")
    }

    async fn wait_in_flight<R: Record>(pipeline: &Pipeline<R>, count: usize) {
        while lock_in_flight(&pipeline.in_flight).len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn logged(path: &std::path::Path) -> Vec<(String, String)> {
        std::fs::read_to_string(path)
            .expect("log should be readable")
            .lines()
            .map(|line| {
                let entry: serde_json::Value = serde_json::from_str(line).expect("json line");
                (
                    entry["event_id"].as_str().expect("event_id").to_string(),
                    entry["reason"].as_str().expect("reason").to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = ClientConfig {
            max_batch_size: 0,
            ..config()
        };
        let transport = Arc::new(HangingTransport);
        assert!(Pipeline::<JsonRecord>::with_transport(&config, transport).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::OK,
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::with_transport(&config(), transport.clone()).expect("start");
        pipeline.enqueue(record("a")).await;

        assert_eq!(pipeline.close().await, ShutdownOutcome::Graceful);
        let calls = transport.calls.load(Ordering::SeqCst);
        let entries = pipeline.recorder().entries_written();

        assert_eq!(pipeline.close().await, ShutdownOutcome::AlreadyClosed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), calls);
        assert_eq!(pipeline.recorder().entries_written(), entries);
        assert!(pipeline.is_closed());
    }

    #[tokio::test]
    async fn test_forced_close_records_in_flight_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("unsent.log");
        let config = ClientConfig {
            unsent_log_path: Some(path.clone()),
            ..config()
        };
        let pipeline =
            Pipeline::with_transport(&config, Arc::new(HangingTransport)).expect("start");
        pipeline.enqueue(record("a")).await;
        pipeline.enqueue(record("b")).await;

        // Let the scheduler pick the batch up and block on the transport.
        wait_in_flight(&pipeline, 2).await;

        let outcome = pipeline
            .close_with_timeout(Duration::from_millis(50))
            .await;

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert!(pipeline.queue().is_empty());
        assert_eq!(pipeline.recorder().entries_written(), 2);
        let orphaned = "NotSent_Shutdown_Orphaned".to_string();
        assert_eq!(
            logged(&path),
            vec![
                ("a".to_string(), orphaned.clone()),
                ("b".to_string(), orphaned),
            ]
        );
    }

    #[tokio::test]
    async fn test_blocked_producer_is_logged_at_close() {
        let config = ClientConfig {
            queue_capacity: Some(1),
            overflow_policy: OverflowPolicy::Block,
            ..config()
        };
        let pipeline = Arc::new(
            Pipeline::with_transport(&config, Arc::new(HangingTransport)).expect("start"),
        );
        pipeline.enqueue(record("a")).await;
        wait_in_flight(&pipeline, 1).await;
        assert_eq!(pipeline.enqueue(record("b")).await, DeliveryStatus::Queued);

        let producer = Arc::clone(&pipeline);
        let blocked = tokio::spawn(async move { producer.enqueue(record("c")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        let outcome = pipeline
            .close_with_timeout(Duration::from_millis(50))
            .await;
        let status = blocked.await.expect("producer task");

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert_eq!(
            status,
            DeliveryStatus::Logged(UnsentReason::ShutdownOrphaned)
        );
        assert!(pipeline.queue().is_empty());
        assert_eq!(pipeline.recorder().entries_written(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_close_waits_for_first() {
        let pipeline =
            Pipeline::with_transport(&config(), Arc::new(HangingTransport)).expect("start");
        pipeline.enqueue(record("a")).await;
        wait_in_flight(&pipeline, 1).await;

        let (first, second) = tokio::join!(
            pipeline.close_with_timeout(Duration::from_millis(100)),
            async {
                let outcome = pipeline.close_with_timeout(Duration::from_millis(100)).await;
                (outcome, pipeline.recorder().entries_written())
            }
        );

        assert_eq!(first, ShutdownOutcome::Forced);
        assert_eq!(second, (ShutdownOutcome::AlreadyClosed, 1));
    }

    #[tokio::test]
    async fn test_send_after_close_makes_no_request() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::OK,
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::with_transport(&config(), transport.clone()).expect("start");
        pipeline.close().await;

        assert_eq!(
            pipeline.send(record("late")).await,
            DeliveryStatus::Logged(UnsentReason::ShutdownOrphaned)
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.recorder().entries_written(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_orphaned() {
        let transport = Arc::new(StatusTransport {
            status: StatusCode::OK,
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::with_transport(&config(), transport).expect("start");
        pipeline.close().await;

        assert_eq!(
            pipeline.enqueue(record("late")).await,
            DeliveryStatus::Logged(UnsentReason::ShutdownOrphaned)
        );
        assert!(pipeline.queue().is_empty());
    }
}
