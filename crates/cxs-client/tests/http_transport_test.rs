// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use cxs_client::config::AuthScheme;
use cxs_client::transport::FailureKind;
use cxs_client::{ClientConfig, HttpTransport, SendOutcome, Transport};
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Duration;

const WRITE_KEY: &str = "test-write-key";
const BASIC_AUTH: &str = "Basic dGVzdC13cml0ZS1rZXk6dGVzdC13cml0ZS1rZXk=";

fn transport(server: &Server) -> HttpTransport {
    let config = ClientConfig {
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::new(WRITE_KEY, format!("{}/v1", server.url()))
    };
    HttpTransport::new(&config)
}

#[tokio::test]
async fn single_record_is_posted_as_object() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1")
        .match_header("content-type", "application/json")
        .match_header("authorization", BASIC_AUTH)
        .match_body(Matcher::Json(json!({"messageId": "a"})))
        .with_status(200)
        .create_async()
        .await;

    let outcome = transport(&server).send_one(&json!({"messageId": "a"})).await;

    assert_eq!(outcome, SendOutcome::Delivered);
    mock.assert_async().await;
}

#[tokio::test]
async fn batch_is_posted_as_array() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1")
        .match_body(Matcher::Json(
            json!([{"messageId": "a"}, {"messageId": "b"}]),
        ))
        .with_status(202)
        .create_async()
        .await;

    let records = [json!({"messageId": "a"}), json!({"messageId": "b"})];
    let outcome = transport(&server).send_many(&records).await;

    assert_eq!(outcome, SendOutcome::Delivered);
    mock.assert_async().await;
}

#[tokio::test]
async fn bearer_scheme_sends_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1")
        .match_header("authorization", format!("Bearer {WRITE_KEY}").as_str())
        .with_status(200)
        .create_async()
        .await;

    let config = ClientConfig {
        auth_scheme: AuthScheme::Bearer,
        ..ClientConfig::new(WRITE_KEY, format!("{}/v1", server.url()))
    };
    let outcome = HttpTransport::new(&config)
        .send_one(&json!({"messageId": "a"}))
        .await;

    assert_eq!(outcome, SendOutcome::Delivered);
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retryable() {
    for status in [500, 502, 503, 504, 429] {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1")
            .with_status(status)
            .create_async()
            .await;

        let outcome = transport(&server).send_one(&json!({})).await;
        assert!(
            matches!(outcome, SendOutcome::Retryable(ref d) if d.kind == FailureKind::Status),
            "{status} should be retryable, got {outcome:?}"
        );
    }
}

#[tokio::test]
async fn client_errors_are_not_retryable() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1")
        .with_status(400)
        .with_body("invalid event")
        .create_async()
        .await;

    let outcome = transport(&server).send_one(&json!({})).await;

    let SendOutcome::NonRetryable(detail) = outcome else {
        panic!("expected non-retryable, got {outcome:?}");
    };
    assert_eq!(detail.kind, FailureKind::Status);
    assert_eq!(detail.status.map(|s| s.as_u16()), Some(400));
    assert_eq!(detail.message, "invalid event");
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    // Bind then drop a listener so the port is very likely closed.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let config = ClientConfig::new(WRITE_KEY, format!("http://127.0.0.1:{port}/v1"));

    let outcome = HttpTransport::new(&config).send_one(&json!({})).await;

    assert!(
        matches!(outcome, SendOutcome::Retryable(ref d) if d.kind == FailureKind::Connection),
        "got {outcome:?}"
    );
}
