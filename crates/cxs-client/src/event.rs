// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Semantic events and their wire form.
//!
//! Events are built with an [`EventBuilder`], which checks the identity and naming rules,
//! then finalized by the client (timestamp, library, write key, environment context) before
//! they enter the pipeline as records.

use crate::error::ClientError;
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;

pub const IDENTIFY_EVENT_NAME: &str = "User Identified";
pub const PAGE_EVENT_NAME: &str = "Page Viewed";
pub const SCREEN_EVENT_NAME: &str = "Screen Viewed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Identify,
    Page,
    Screen,
}

impl EventType {
    /// Name used when the caller does not supply one. Track events have none.
    #[must_use]
    pub fn default_name(self) -> Option<&'static str> {
        match self {
            Self::Track => None,
            Self::Identify => Some(IDENTIFY_EVENT_NAME),
            Self::Page => Some(PAGE_EVENT_NAME),
            Self::Screen => Some(SCREEN_EVENT_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
}

impl Default for LibraryInfo {
    fn default() -> Self {
        Self {
            name: crate::CLIENT_NAME.to_string(),
            version: crate::CLIENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryInfo>,
}

/// Reference from a derived event to the event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub event: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&Event> for EventLink {
    fn from(event: &Event) -> Self {
        Self {
            event_type: event.event_type,
            event: event.event.clone(),
            message_id: event.message_id.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub message_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub traits: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsInfo>,
    #[serde(rename = "write_key", skip_serializing_if = "Option::is_none")]
    pub write_key: Option<String>,
    #[serde(rename = "base_events", default, skip_serializing_if = "Vec::is_empty")]
    pub base_events: Vec<EventLink>,
}

impl Record for Event {
    fn id(&self) -> &str {
        &self.message_id
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: EventType,
    event: String,
    user_id: Option<String>,
    anonymous_id: Option<String>,
    message_id: Option<String>,
    properties: Map<String, Value>,
    traits: Map<String, Value>,
    root: Option<EventLink>,
}

impl EventBuilder {
    fn new(event_type: EventType, event: String) -> Self {
        Self {
            event_type,
            event,
            user_id: None,
            anonymous_id: None,
            message_id: None,
            properties: Map::new(),
            traits: Map::new(),
            root: None,
        }
    }

    #[must_use]
    pub fn track(name: impl Into<String>) -> Self {
        Self::new(EventType::Track, name.into())
    }

    #[must_use]
    pub fn identify() -> Self {
        Self::new(EventType::Identify, String::new())
    }

    /// Page view. An empty name falls back to `Page Viewed`.
    #[must_use]
    pub fn page(name: impl Into<String>) -> Self {
        Self::new(EventType::Page, name.into())
    }

    /// Screen view. An empty name falls back to `Screen Viewed`.
    #[must_use]
    pub fn screen(name: impl Into<String>) -> Self {
        Self::new(EventType::Screen, name.into())
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn anonymous_id(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn traits(mut self, traits: Map<String, Value>) -> Self {
        self.traits.extend(traits);
        self
    }

    /// Links the event to the event that caused it.
    #[must_use]
    pub fn root_event(mut self, root: EventLink) -> Self {
        self.root = Some(root);
        self
    }

    /// Validates identity and naming and produces an event without environment details.
    pub fn build(self) -> Result<Event, ClientError> {
        let user_id = self.user_id.filter(|id| !id.trim().is_empty());
        let anonymous_id = self.anonymous_id.filter(|id| !id.trim().is_empty());
        if user_id.is_none() && anonymous_id.is_none() {
            return Err(ClientError::Construction(format!(
                "{:?} event requires a user id or an anonymous id",
                self.event_type
            )));
        }

        let event = match self.event_type.default_name() {
            _ if !self.event.trim().is_empty() => self.event,
            Some(default) => default.to_string(),
            None => {
                return Err(ClientError::Construction(
                    "track event requires a name".to_string(),
                ))
            }
        };

        Ok(Event {
            message_id: self.message_id.unwrap_or_default(),
            event_type: self.event_type,
            event,
            user_id,
            anonymous_id,
            timestamp: None,
            properties: self.properties,
            traits: self.traits,
            context: None,
            app: None,
            library: None,
            os: None,
            write_key: None,
            base_events: self.root.into_iter().collect(),
        })
    }
}

/// Deployment details attached to every event, read once from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub pod_ip: Option<String>,
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub pod_hostname: Option<String>,
    pub node_name: Option<String>,
    pub app_name: Option<String>,
    pub app_namespace: Option<String>,
    pub app_version: Option<String>,
    pub app_build: Option<String>,
}

impl EnvironmentContext {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            pod_ip: read_var("MY_POD_IP"),
            pod_name: read_var("MY_POD_NAME"),
            pod_namespace: read_var("MY_POD_NAMESPACE"),
            pod_hostname: read_var("MY_POD_HOSTNAME"),
            node_name: read_var("MY_NODE_NAME"),
            app_name: read_var("MY_APP_NAME"),
            app_namespace: read_var("MY_APP_NAMESPACE"),
            app_version: read_var("MY_APP_VERSION"),
            app_build: read_var("MY_APP_BUILD"),
        }
    }

    /// `MY_APP_NAME` wins over the configured application name.
    #[must_use]
    pub fn application<'a>(&'a self, configured: Option<&'a str>) -> Option<&'a str> {
        self.app_name.as_deref().or(configured)
    }

    #[must_use]
    pub fn context(&self, application: Option<&str>) -> EventContext {
        EventContext {
            hostname: self.pod_hostname.clone(),
            pod_ip: self.pod_ip.clone(),
            pod_name: self.pod_name.clone(),
            pod_namespace: self.pod_namespace.clone(),
            node_name: self.node_name.clone(),
            application: application.map(str::to_string),
            library: Some(LibraryInfo::default()),
        }
    }

    #[must_use]
    pub fn app(&self, application: Option<&str>) -> AppInfo {
        AppInfo {
            name: application.map(str::to_string),
            namespace: self.app_namespace.clone(),
            version: self.app_version.clone(),
            build: self.app_build.clone(),
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
