//! # Queue backends
//!
//! [`MessageQueue`] is the operation set shared by the Postgres client
//! ([`crate::TongaClient`]) and the in-process engine ([`MemoryBackend`]).
//! Code written against the trait can run against either.

pub mod clock;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Channel, ChannelMetrics, ChannelOpts, Message, SendOpts};

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryBackend;

/// Channel and message operations of a tonga engine
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Register a channel bound to `topic`, or rebind an existing one
    async fn create_channel(&self, queue_name: &str, topic: &str, opts: ChannelOpts)
        -> Result<()>;

    /// Remove a channel and its messages; returns whether it existed
    async fn delete_channel(&self, queue_name: &str) -> Result<bool>;

    /// All registered channels, ordered by name
    async fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Append a JSON body to every channel bound to `topic`; returns the number of channels
    async fn send_json(&self, topic: &str, body: &serde_json::Value, opts: SendOpts)
        -> Result<u64>;

    /// Claim up to `quantity` eligible messages, hiding each for `hide_for`
    async fn read(&self, queue_name: &str, quantity: u32, hide_for: Duration)
        -> Result<Vec<Message>>;

    /// Acknowledge a message; returns whether it existed
    async fn delete(&self, queue_name: &str, id: i64) -> Result<bool>;

    /// Reclaim expired channels; returns how many were removed
    async fn gc(&self) -> Result<u64>;

    /// Message counts for one channel
    async fn metrics(&self, queue_name: &str) -> Result<ChannelMetrics>;
}
