//! # In-process tonga engine
//!
//! Same channel, visibility and expiry rules as the Postgres functions, held
//! in memory behind a single lock. A read selects and hides its batch while
//! holding the lock, so concurrent readers never receive the same message
//! inside one hide-for window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::MessageQueue;
use crate::error::{Result, TongaError};
use crate::types::{
    validate_channel_name, validate_topic, Channel, ChannelMetrics, ChannelOpts, Message, SendOpts,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    hidden_until: Option<DateTime<Utc>>,
}

impl StoredMessage {
    fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.message.deliver_at > now
    }

    fn is_hidden(&self, now: DateTime<Utc>) -> bool {
        self.hidden_until.is_some_and(|until| until > now)
    }

    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        !self.is_deferred(now) && !self.is_hidden(now)
    }
}

#[derive(Debug)]
struct ChannelState {
    channel: Channel,
    messages: BTreeMap<i64, StoredMessage>,
}

#[derive(Debug, Default)]
struct EngineState {
    channels: BTreeMap<String, ChannelState>,
    last_message_id: i64,
}

/// Message queue engine that keeps everything in process memory
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<EngineState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Engine driven by the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Engine driven by a caller-supplied clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            clock,
        }
    }

    /// Serialize `body` and send it
    pub async fn send<T>(&self, topic: &str, body: &T, opts: SendOpts) -> Result<u64>
    where
        T: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.send_json(topic, &body, opts).await
    }

    /// Instant a message claimed at `now` becomes visible again
    fn hidden_until(now: DateTime<Utc>, hide_for: Duration) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(hide_for)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| TongaError::invalid_argument("hide_for is out of range"))
    }
}

#[async_trait]
impl MessageQueue for MemoryBackend {
    #[instrument(skip(self, opts), fields(queue = %queue_name, topic = %topic))]
    async fn create_channel(
        &self,
        queue_name: &str,
        topic: &str,
        opts: ChannelOpts,
    ) -> Result<()> {
        validate_channel_name(queue_name)?;
        validate_topic(topic)?;

        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.channels.get_mut(queue_name) {
            Some(existing) => {
                existing.channel.topic = topic.to_string();
                existing.channel.delete_at = opts.delete_at;
                debug!("Channel rebound: {}", queue_name);
            }
            None => {
                state.channels.insert(
                    queue_name.to_string(),
                    ChannelState {
                        channel: Channel {
                            name: queue_name.to_string(),
                            topic: topic.to_string(),
                            delete_at: opts.delete_at,
                            unlogged: opts.unlogged,
                            created_at: now,
                        },
                        messages: BTreeMap::new(),
                    },
                );
                info!("Channel created: {}", queue_name);
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %queue_name))]
    async fn delete_channel(&self, queue_name: &str) -> Result<bool> {
        let existed = self.state.lock().channels.remove(queue_name).is_some();
        if existed {
            warn!("Channel deleted: {}", queue_name);
        }
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .state
            .lock()
            .channels
            .values()
            .map(|state| state.channel.clone())
            .collect())
    }

    #[instrument(skip(self, body, opts), fields(topic = %topic))]
    async fn send_json(
        &self,
        topic: &str,
        body: &serde_json::Value,
        opts: SendOpts,
    ) -> Result<u64> {
        validate_topic(topic)?;

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.last_message_id += 1;
        let message = Message {
            id: state.last_message_id,
            topic: topic.to_string(),
            body: body.clone(),
            created_at: now,
            deliver_at: opts.deliver_at.unwrap_or(now),
        };

        let mut deliveries = 0;
        for channel_state in state
            .channels
            .values_mut()
            .filter(|c| c.channel.topic == topic)
        {
            channel_state.messages.insert(
                message.id,
                StoredMessage {
                    message: message.clone(),
                    hidden_until: None,
                },
            );
            deliveries += 1;
        }

        debug!(
            "Message {} sent on topic {} to {} channel(s)",
            message.id, topic, deliveries
        );
        Ok(deliveries)
    }

    #[instrument(skip(self), fields(queue = %queue_name, quantity = quantity))]
    async fn read(&self, queue_name: &str, quantity: u32, hide_for: Duration) -> Result<Vec<Message>> {
        if quantity == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let hidden_until = Self::hidden_until(now, hide_for)?;
        let mut state = self.state.lock();

        let channel_state = state
            .channels
            .get_mut(queue_name)
            .ok_or_else(|| TongaError::channel_not_found(queue_name))?;

        let batch: Vec<Message> = channel_state
            .messages
            .values_mut()
            .filter(|stored| stored.is_visible(now))
            .take(quantity as usize)
            .map(|stored| {
                stored.hidden_until = Some(hidden_until);
                stored.message.clone()
            })
            .collect();

        debug!("Read {} messages from channel: {}", batch.len(), queue_name);
        Ok(batch)
    }

    #[instrument(skip(self), fields(queue = %queue_name, message_id = id))]
    async fn delete(&self, queue_name: &str, id: i64) -> Result<bool> {
        let mut state = self.state.lock();
        let existed = state
            .channels
            .get_mut(queue_name)
            .is_some_and(|channel_state| channel_state.messages.remove(&id).is_some());

        debug!("Message {} deleted: {}", id, existed);
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn gc(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let before = state.channels.len();
        state
            .channels
            .retain(|_, channel_state| !channel_state.channel.is_expired(now));
        let reclaimed = u64::try_from(before - state.channels.len()).unwrap_or(0);

        if reclaimed > 0 {
            warn!("Garbage collected {} expired channel(s)", reclaimed);
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self), fields(queue = %queue_name))]
    async fn metrics(&self, queue_name: &str) -> Result<ChannelMetrics> {
        let now = self.clock.now();
        let state = self.state.lock();
        let channel_state = state
            .channels
            .get(queue_name)
            .ok_or_else(|| TongaError::channel_not_found(queue_name))?;

        let mut metrics = ChannelMetrics {
            queue_name: queue_name.to_string(),
            ..ChannelMetrics::default()
        };
        let mut oldest_visible: Option<DateTime<Utc>> = None;

        for stored in channel_state.messages.values() {
            metrics.total += 1;
            if stored.is_deferred(now) {
                metrics.deferred += 1;
            } else if stored.is_hidden(now) {
                metrics.hidden += 1;
            } else {
                metrics.visible += 1;
                let created_at = stored.message.created_at;
                oldest_visible = Some(oldest_visible.map_or(created_at, |o| o.min(created_at)));
            }
        }

        metrics.oldest_visible_age_seconds =
            oldest_visible.map(|created_at| (now - created_at).num_seconds());
        Ok(metrics)
    }
}
