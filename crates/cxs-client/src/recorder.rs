// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only log of events that were not delivered.
//!
//! Every entry is one JSON object per line:
//!
//! ```text
//! {"timestamp":"2025-01-01T00:00:00.000Z","level":"WARN","message":"...","reason":"BatchSendFailed_ReQueued","event_id":"...","event_data":{...}}
//! ```
//!
//! The log is an audit trail for manual recovery, not a replay queue. The recorder never
//! returns an error: if the configured file cannot be opened or written, entries go to
//! stderr, and if stderr fails too a last-resort diagnostic is emitted through `tracing`.

use crate::record::Record;
use chrono::{SecondsFormat, Utc};
use derive_more::Display;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, trace, warn, Level};

/// Why a record ended up in the unsent-event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnsentReason {
    /// The record could not be serialized; it never reached the network.
    #[display("ConstructionError")]
    Construction,
    /// The endpoint rejected the request with a 4xx other than 429.
    #[display("NonRetryableHTTPError")]
    NonRetryableHttp,
    /// A direct send failed in a way the transport could not classify.
    #[display("UnexpectedSendError")]
    UnexpectedSend,
    /// Diagnostic entry: the batch failed and the record went back to the queue.
    #[display("BatchSendFailed_ReQueued")]
    BatchSendFailedRequeued,
    /// The last batch sent while draining failed.
    #[display("NotSent_Shutdown_FinalBatchFailed")]
    ShutdownFinalBatchFailed,
    /// The record was still queued (or in flight) when the pipeline stopped.
    #[display("NotSent_Shutdown_Orphaned")]
    ShutdownOrphaned,
    /// A bounded queue displaced the record.
    #[display("NotSent_QueueOverflow")]
    QueueOverflow,
    /// The record failed as many batch attempts as the retry strategy allows.
    #[display("NotSent_MaxRetriesExceeded")]
    MaxRetriesExceeded,
}

impl UnsentReason {
    /// Whether the record left the pipeline with this entry. `BatchSendFailedRequeued` is
    /// the only diagnostic reason: the record is still queued for another attempt.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::BatchSendFailedRequeued)
    }

    /// Level an entry with this reason is written at.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::BatchSendFailedRequeued | Self::QueueOverflow => Level::WARN,
            _ => Level::ERROR,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Construction => "Event could not be serialized and was not sent",
            Self::NonRetryableHttp => "Event rejected by the endpoint and will not be retried",
            Self::UnexpectedSend => "Event not sent due to an unexpected error",
            Self::BatchSendFailedRequeued => "Batch send failed, event re-queued",
            Self::ShutdownFinalBatchFailed => "Final batch failed during shutdown, event not sent",
            Self::ShutdownOrphaned => "Event still pending at shutdown, not sent",
            Self::QueueOverflow => "Event displaced by a full queue, not sent",
            Self::MaxRetriesExceeded => "Event exhausted its retry attempts, not sent",
        }
    }
}

#[derive(Serialize)]
struct UnsentLogEntry<'a> {
    timestamp: String,
    level: &'static str,
    message: &'static str,
    reason: String,
    event_id: &'a str,
    event_data: &'a Value,
}

enum Sink {
    File(File),
    Stream,
}

pub struct UnsentEventRecorder {
    sink: Mutex<Sink>,
    path: Option<PathBuf>,
    entries: AtomicUsize,
}

impl UnsentEventRecorder {
    /// Opens the recorder. Without a path, or if the file cannot be opened, entries are
    /// written to stderr.
    #[must_use]
    pub fn open(path: Option<&Path>) -> Self {
        let sink = match path {
            Some(path) => match open_append(path) {
                Ok(file) => {
                    debug!("Recording unsent events to {}", path.display());
                    Sink::File(file)
                }
                Err(e) => {
                    error!(
                        "Failed to open unsent event log {}: {e}, falling back to stderr",
                        path.display()
                    );
                    Sink::Stream
                }
            },
            None => Sink::Stream,
        };

        Self {
            sink: Mutex::new(sink),
            path: path.map(Path::to_path_buf),
            entries: AtomicUsize::new(0),
        }
    }

    /// Recorder that only writes to stderr.
    #[must_use]
    pub fn stream() -> Self {
        Self::open(None)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries successfully written since the recorder was opened.
    #[must_use]
    pub fn entries_written(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    /// Appends one entry. Never fails to the caller.
    pub fn record(&self, level: Level, event_id: &str, event_data: &Value, reason: UnsentReason) {
        mirror(level, event_id, reason);

        let entry = UnsentLogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.as_str(),
            message: reason.message(),
            reason: reason.to_string(),
            event_id,
            event_data,
        };
        let mut line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!("Unsent event {event_id} ({reason}) lost: failed to encode entry: {e}");
                return;
            }
        };
        line.push('\n');

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Sink::File(file) = &mut *sink {
            match file.write_all(line.as_bytes()) {
                Ok(()) => {
                    self.entries.fetch_add(1, Ordering::AcqRel);
                    return;
                }
                Err(e) => {
                    error!("Failed to write unsent event log: {e}, falling back to stderr");
                    *sink = Sink::Stream;
                }
            }
        }

        let mut stderr = std::io::stderr().lock();
        match stderr.write_all(line.as_bytes()) {
            Ok(()) => {
                self.entries.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                error!("Unsent event {event_id} ({reason}) lost: stderr unavailable: {e}");
            }
        }
    }

    /// Records a pipeline record at the reason's default level.
    pub fn record_unsent<R: Record>(&self, record: &R, reason: UnsentReason) {
        let payload = record
            .to_payload()
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {e}>")));
        self.record(reason.level(), record.id(), &payload, reason);
    }

    /// Flushes and releases the file handle. Later entries go to stderr.
    pub fn close(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Sink::File(file) = &mut *sink {
            if let Err(e) = file.flush().and_then(|()| file.sync_all()) {
                warn!("Failed to flush unsent event log on close: {e}");
            }
        }
        *sink = Sink::Stream;
    }
}

impl std::fmt::Debug for UnsentEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsentEventRecorder")
            .field("path", &self.path)
            .field("entries", &self.entries_written())
            .finish_non_exhaustive()
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn mirror(level: Level, event_id: &str, reason: UnsentReason) {
    let message = reason.message();
    match level {
        Level::ERROR => error!(event_id, %reason, "{message}"),
        Level::WARN => warn!(event_id, %reason, "{message}"),
        Level::INFO => info!(event_id, %reason, "{message}"),
        Level::DEBUG => debug!(event_id, %reason, "{message}"),
        _ => trace!(event_id, %reason, "{message}"),
    }
}
