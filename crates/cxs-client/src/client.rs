// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Semantic event API on top of the delivery pipeline.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::{EnvironmentContext, Event, EventBuilder, EventLink, LibraryInfo, OsInfo};
use crate::pipeline::{Pipeline, ShutdownOutcome};
use crate::sender::DeliveryStatus;
use crate::transport::Transport;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Result of handing an event to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Link to the sent event, usable as the root of follow-up events.
    pub link: EventLink,
    pub status: DeliveryStatus,
}

pub struct CxsClient {
    pipeline: Pipeline<Event>,
    write_key: String,
    application: Option<String>,
    environment: EnvironmentContext,
}

impl CxsClient {
    /// Starts a client posting to the configured endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let pipeline = Pipeline::start(config)?;
        Ok(Self::from_pipeline(config, pipeline))
    }

    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let pipeline = Pipeline::with_transport(config, transport)?;
        Ok(Self::from_pipeline(config, pipeline))
    }

    fn from_pipeline(config: &ClientConfig, pipeline: Pipeline<Event>) -> Self {
        Self {
            pipeline,
            write_key: config.write_key.clone(),
            application: config.application.clone(),
            environment: EnvironmentContext::from_env(),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<Event> {
        &self.pipeline
    }

    /// Builds, finalizes and sends an event.
    ///
    /// Fails only when the event is invalid or the client is closed. Delivery problems are
    /// reported through [`Receipt::status`].
    pub async fn send(&self, builder: EventBuilder) -> Result<Receipt, ClientError> {
        if self.pipeline.is_closed() {
            return Err(ClientError::Closed);
        }
        let event = self.finalize(builder.build()?);
        let link = EventLink::from(&event);
        debug!("Sending {:?} event {}", event.event_type, event.message_id);

        let status = self.pipeline.send(event).await;
        Ok(Receipt { link, status })
    }

    pub async fn track(
        &self,
        user_id: &str,
        name: &str,
        properties: Map<String, Value>,
    ) -> Result<Receipt, ClientError> {
        self.send(
            EventBuilder::track(name)
                .user_id(user_id)
                .properties(properties),
        )
        .await
    }

    pub async fn identify(
        &self,
        user_id: &str,
        traits: Map<String, Value>,
    ) -> Result<Receipt, ClientError> {
        self.send(EventBuilder::identify().user_id(user_id).traits(traits))
            .await
    }

    pub async fn page(
        &self,
        user_id: &str,
        name: &str,
        properties: Map<String, Value>,
    ) -> Result<Receipt, ClientError> {
        self.send(
            EventBuilder::page(name)
                .user_id(user_id)
                .properties(properties),
        )
        .await
    }

    pub async fn screen(
        &self,
        user_id: &str,
        name: &str,
        properties: Map<String, Value>,
    ) -> Result<Receipt, ClientError> {
        self.send(
            EventBuilder::screen(name)
                .user_id(user_id)
                .properties(properties),
        )
        .await
    }

    /// Drains pending events and stops the pipeline. Later sends fail with
    /// [`ClientError::Closed`].
    pub async fn close(&self) -> ShutdownOutcome {
        self.pipeline.close().await
    }

    fn finalize(&self, mut event: Event) -> Event {
        if event.message_id.is_empty() {
            event.message_id = uuid::Uuid::new_v4().to_string();
        }
        let application = self.environment.application(self.application.as_deref());

        event.timestamp = Some(Utc::now());
        event.library = Some(LibraryInfo::default());
        event.write_key = Some(self.write_key.clone());
        event.os = Some(OsInfo {
            name: std::env::consts::OS.to_string(),
        });
        event.context = Some(self.environment.context(application));
        event.app = Some(self.environment.app(application));
        event
    }
}
