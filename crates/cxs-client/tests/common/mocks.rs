// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transport and records for pipeline tests

use async_trait::async_trait;
use cxs_client::transport::{classify_status, FailureDetail, FailureKind, Payload};
use cxs_client::{Record, SendOutcome, Transport};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One request seen by the mock transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub body: Value,
    pub outcome: SendOutcome,
}

impl Call {
    /// Message ids carried by the request body.
    pub fn ids(&self) -> Vec<String> {
        let ids = |v: &Value| v["messageId"].as_str().unwrap_or_default().to_string();
        match &self.body {
            Value::Array(records) => records.iter().map(ids).collect(),
            single => vec![ids(single)],
        }
    }
}

/// Answers requests from a script of statuses; once the script runs out the fallback
/// status is repeated (or the script is cycled).
pub struct MockTransport {
    script: Mutex<VecDeque<u16>>,
    fallback: u16,
    cycle: bool,
    calls: Mutex<Vec<Call>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn always(status: u16) -> Self {
        Self::scripted(&[], status)
    }

    pub fn scripted(statuses: &[u16], fallback: u16) -> Self {
        Self {
            script: Mutex::new(statuses.iter().copied().collect()),
            fallback,
            cycle: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn cycling(statuses: &[u16]) -> Self {
        Self {
            cycle: true,
            ..Self::scripted(statuses, 200)
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Ids of every record the transport reported as delivered.
    pub fn delivered_ids(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|call| call.outcome == SendOutcome::Delivered)
            .flat_map(Call::ids)
            .collect()
    }

    fn next_status(&self) -> u16 {
        let mut script = self.script.lock().expect("script lock");
        match script.pop_front() {
            Some(status) => {
                if self.cycle {
                    script.push_back(status);
                }
                status
            }
            None => self.fallback,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, payload: Payload<'_>) -> SendOutcome {
        let status = self.next_status();
        let outcome = match status {
            0 => SendOutcome::Retryable(FailureDetail::new(
                FailureKind::Connection,
                None,
                "connection refused",
            )),
            code => classify_status(
                StatusCode::from_u16(code).expect("valid status"),
                String::new(),
            ),
        };
        let body = serde_json::to_value(payload).expect("payload serializes");
        self.calls.lock().expect("calls lock").push(Call {
            body,
            outcome: outcome.clone(),
        });
        outcome
    }
}

/// Record with a fixed id; `broken` records fail to serialize.
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub id: String,
    pub broken: bool,
}

#[allow(dead_code)]
impl TestRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            broken: false,
        }
    }

    pub fn broken(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            broken: true,
        }
    }

    pub fn payload(&self) -> Value {
        json!({"messageId": self.id, "event": "Test Event"})
    }
}

impl Record for TestRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        if self.broken {
            // A map with non-string keys cannot become a JSON object.
            let invalid: std::collections::BTreeMap<(u8, u8), u8> =
                [((1, 2), 3)].into_iter().collect();
            return serde_json::to_value(invalid);
        }
        Ok(self.payload())
    }
}
