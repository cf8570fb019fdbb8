// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction.
//!
//! One `reqwest::Client` is built per transport and reused for every request so
//! connections are pooled. An unusable proxy setting never prevents delivery: the client
//! falls back to a direct connection and logs why.

use crate::config::ClientConfig;
use core::time::Duration;
use reqwest::ClientBuilder;
use std::error::Error;
use tracing::{debug, error};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);
const TCP_KEEPALIVE: Duration = Duration::from_secs(120);

#[must_use]
pub fn get_client(config: &ClientConfig) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match base_builder(config).build() {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &ClientConfig) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = base_builder(config);
    if let Some(proxy) = &config.https_proxy {
        debug!("Using HTTPS proxy for event delivery");
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

fn base_builder(config: &ClientConfig) -> ClientBuilder {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
}
