//! # Types for the tonga client
//!
//! Channel and message records shared by the Postgres client and the
//! in-process engine, plus the option structs accepted by each operation.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, TongaError};

/// Longest channel name that still fits the `tonga_q_` table prefix in a Postgres identifier
pub const MAX_CHANNEL_NAME_LEN: usize = 47;

/// Check that a channel name can be used as a table suffix: `^[a-z_][a-z0-9_]*$`
pub fn validate_channel_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(TongaError::invalid_channel_name(name));
    }
    Ok(())
}

/// Check that a topic can be used as a routing key
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(TongaError::invalid_argument("topic must not be empty"));
    }
    Ok(())
}

/// Options for creating a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpts {
    /// When set, the garbage collector reclaims the channel after this instant
    pub delete_at: Option<DateTime<Utc>>,
    /// Store the channel in an unlogged table
    pub unlogged: bool,
}

impl ChannelOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the channel for reclamation
    pub fn with_delete_at(mut self, delete_at: DateTime<Utc>) -> Self {
        self.delete_at = Some(delete_at);
        self
    }

    /// Choose unlogged storage
    pub fn with_unlogged(mut self, unlogged: bool) -> Self {
        self.unlogged = unlogged;
        self
    }
}

/// Options for sending a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOpts {
    /// Earliest instant the message may be read; `None` means immediately
    pub deliver_at: Option<DateTime<Utc>>,
}

impl SendOpts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer delivery until the given instant
    pub fn with_deliver_at(mut self, deliver_at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(deliver_at);
        self
    }
}

/// A registered channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub name: String,
    pub topic: String,
    pub delete_at: Option<DateTime<Utc>>,
    pub unlogged: bool,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Whether the garbage collector may reclaim this channel at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.delete_at.is_some_and(|deadline| deadline <= now)
    }
}

/// A message as returned by a read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub topic: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deliver_at: DateTime<Utc>,
}

impl Message {
    /// Deserialize the body into a caller type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Per-channel message counts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChannelMetrics {
    /// Name of the channel
    pub queue_name: String,
    /// Every stored message
    pub total: i64,
    /// Messages a read would return now
    pub visible: i64,
    /// Messages inside a hide-for window
    pub hidden: i64,
    /// Messages whose deliver-at is still in the future
    pub deferred: i64,
    /// Age in seconds of the oldest visible message
    pub oldest_visible_age_seconds: Option<i64>,
}

/// Client status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatus {
    /// Type of client (e.g., "tonga-postgres")
    pub client_type: String,
    /// Whether the backend answered a health check
    pub connected: bool,
    /// Backend-specific details
    pub connection_info: HashMap<String, serde_json::Value>,
    /// When the status was taken
    pub last_activity: Option<DateTime<Utc>>,
}
