// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwards newline-delimited JSON events from stdin to the CXS collection endpoint.
//!
//! Configuration is read from `CXS_*` environment variables. Each input line must be a JSON
//! object; its `messageId` (or `message_id`) identifies it, and one is generated when
//! missing. The pipeline is closed on end of input or Ctrl-C, after which a JSON summary is
//! printed to stdout.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use cxs_client::{ClientConfig, DeliveryStatus, JsonRecord, Pipeline, ShutdownOutcome};
use serde_json::{json, Value};
use std::env;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Summary {
    lines: usize,
    delivered: usize,
    queued: usize,
    logged: usize,
    skipped: usize,
}

impl Summary {
    fn count(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::Queued => self.queued += 1,
            DeliveryStatus::Logged(_) => self.logged += 1,
        }
    }

    fn to_json(&self, outcome: ShutdownOutcome, unsent_entries: usize) -> Value {
        json!({
            "lines": self.lines,
            "delivered": self.delivered,
            "queued": self.queued,
            "logged": self.logged,
            "skipped": self.skipped,
            "unsent_log_entries": unsent_entries,
            "shutdown": format!("{outcome:?}"),
        })
    }
}

/// Whether records go through a direct send first or straight to the batch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Direct,
    Batch,
}

impl Mode {
    fn from_env() -> Self {
        match env::var("CXS_FORWARDER_MODE") {
            Ok(mode) if mode.trim().eq_ignore_ascii_case("batch") => Self::Batch,
            _ => Self::Direct,
        }
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("CXS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let pipeline: Pipeline<JsonRecord> = match Pipeline::start(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Error starting delivery pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mode = Mode::from_env();
    info!("Forwarding events to {} ({mode:?} mode)", config.endpoint);
    let summary = forward(&pipeline, mode).await;

    let outcome = pipeline.close().await;
    let report = summary.to_json(outcome, pipeline.recorder().entries_written());
    println!("{report}");

    if outcome == ShutdownOutcome::Forced {
        warn!("Shutdown timed out; pending events were logged as unsent");
    }
    ExitCode::SUCCESS
}

async fn forward(pipeline: &Pipeline<JsonRecord>, mode: Mode) -> Summary {
    let mut summary = Summary::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("End of input");
                break;
            }
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let Some(record) = parse_line(&line, summary.lines) else {
            summary.skipped += 1;
            continue;
        };
        let status = match mode {
            Mode::Direct => pipeline.send(record).await,
            Mode::Batch => pipeline.enqueue(record).await,
        };
        summary.count(status);
    }

    summary
}

fn parse_line(line: &str, number: usize) -> Option<JsonRecord> {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => {
            let record = JsonRecord::new(value);
            if record.is_none() {
                warn!("Skipping line {number}: not a JSON object");
            }
            record
        }
        Err(e) => {
            warn!("Skipping line {number}: invalid JSON: {e}");
            None
        }
    }
}

fn init_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=warn,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter)?)
        .with_writer(std::io::stderr)
        .event_format(logger::Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    debug!("Logging subsystem enabled");
    Ok(())
}
