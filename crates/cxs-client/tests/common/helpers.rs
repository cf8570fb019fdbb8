// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for pipeline integration tests

use cxs_client::ClientConfig;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Configuration pointing at a dummy endpoint, logging unsent events to `log_path`.
#[allow(dead_code)]
pub fn config(max_batch_size: usize, send_interval: Duration, log_path: &Path) -> ClientConfig {
    ClientConfig {
        max_batch_size,
        send_interval,
        unsent_log_path: Some(log_path.to_path_buf()),
        ..ClientConfig::new("test-write-key", "http://127.0.0.1:1/v1")
    }
}

/// Parses every line of the unsent-event log.
#[allow(dead_code)]
pub fn read_log(path: &Path) -> Vec<Value> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Reasons of every logged entry, in order.
#[allow(dead_code)]
pub fn reasons(path: &Path) -> Vec<String> {
    read_log(path)
        .iter()
        .map(|entry| entry["reason"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Ids of the entries that took a record out of the pipeline.
#[allow(dead_code)]
pub fn terminal_ids(path: &Path) -> Vec<String> {
    read_log(path)
        .iter()
        .filter(|entry| entry["reason"] != "BatchSendFailed_ReQueued")
        .map(|entry| entry["event_id"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Polls `condition` until it holds, panicking after `limit`.
#[allow(dead_code)]
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(limit, poll)
        .await
        .expect("condition not met before the deadline");
}
