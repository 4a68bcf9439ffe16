//! Event payloads relayed to the chat endpoint.
//!
//! Every outbound request body has the shape `{"eventType": ..., "data": ...}`.
//! The relay treats `data` as opaque JSON; the typed structs here cover the
//! content events the host application emits today and serialize with the
//! camelCase field names the relay endpoint expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// Event type for a newly created topic.
pub const TOPIC_CREATE: &str = "topic.create";
/// Event type for a reply posted into an existing topic.
pub const POST_CREATE: &str = "post.create";
/// Event type for a soft-deleted topic.
pub const TOPIC_DELETE: &str = "topic.delete";
/// Event type for a permanently removed topic.
pub const TOPIC_PURGE: &str = "topic.purge";
/// Event type for synthetic connection checks.
pub const TEST: &str = "test";

/// Request body sent to the relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Dotted event name, e.g. `topic.create`.
    pub event_type: String,
    /// Event-specific data, forwarded untouched.
    pub data: Value,
}

impl EventPayload {
    /// Creates a payload with an arbitrary event type and data.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self { event_type: event_type.into(), data }
    }

    /// Builds a `topic.create` payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPayload` if the data cannot be serialized.
    pub fn topic_created(topic: &TopicCreated) -> Result<Self> {
        Ok(Self::new(TOPIC_CREATE, serde_json::to_value(topic)?))
    }

    /// Builds a `post.create` payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPayload` if the data cannot be serialized.
    pub fn post_created(post: &PostCreated) -> Result<Self> {
        Ok(Self::new(POST_CREATE, serde_json::to_value(post)?))
    }

    /// Builds a `topic.delete` payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPayload` if the data cannot be serialized.
    pub fn topic_deleted(topic: &TopicRemoved) -> Result<Self> {
        Ok(Self::new(TOPIC_DELETE, serde_json::to_value(topic)?))
    }

    /// Builds a `topic.purge` payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPayload` if the data cannot be serialized.
    pub fn topic_purged(topic: &TopicRemoved) -> Result<Self> {
        Ok(Self::new(TOPIC_PURGE, serde_json::to_value(topic)?))
    }

    /// Builds the synthetic payload used by connection checks.
    pub fn connection_test(at: DateTime<Utc>) -> Self {
        Self::new(
            TEST,
            json!({
                "message": "Test connection from ferry relay",
                "timestamp": at.timestamp_millis(),
            }),
        )
    }

    /// Dotted event name.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Author details attached to content events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Host application user id.
    pub uid: u64,
    /// Login name.
    pub username: String,
    /// Name shown in chat; see [`crate::origin::display_name`].
    pub display_name: String,
    /// Absolute avatar URL; see [`crate::origin::avatar_url`].
    pub avatar: String,
    /// Email address, when the host exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Data for a `topic.create` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCreated {
    /// Topic id.
    pub topic_id: u64,
    /// Id of the topic's first post.
    pub post_id: u64,
    /// Category the topic was created in.
    pub category_id: u64,
    /// Category display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    /// Category slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_slug: Option<String>,
    /// Topic title.
    pub title: String,
    /// Raw content of the first post.
    pub content: String,
    /// Topic author.
    pub author: Author,
    /// Public link to the topic.
    pub url: String,
    /// Creation time, serialized as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Data for a `post.create` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreated {
    /// Post id.
    pub post_id: u64,
    /// Topic the post replies to.
    pub topic_id: u64,
    /// Category of the parent topic.
    pub category_id: u64,
    /// Title of the parent topic.
    pub topic_title: String,
    /// Slug of the parent topic.
    pub topic_slug: String,
    /// Raw post content.
    pub content: String,
    /// Post author.
    pub author: Author,
    /// Public link to the post.
    pub url: String,
    /// Creation time, serialized as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Data for `topic.delete` and `topic.purge` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRemoved {
    /// Topic id.
    pub topic_id: u64,
    /// Removal time, serialized as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
