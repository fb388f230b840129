//! # Tonga Postgres Client
//!
//! Async client for the `tonga_*` engine functions. The client is stateless
//! apart from its connection pool: it binds arguments, runs the templated
//! call and decodes the result rows. Visibility, fan-out and expiry are
//! enforced inside the database.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::MessageQueue;
use crate::config::TongaConfig;
use crate::error::{Result, TongaError};
use crate::sql;
use crate::types::{
    validate_channel_name, validate_topic, Channel, ChannelMetrics, ChannelOpts, ClientStatus,
    Message, SendOpts,
};

/// Client for a database with the tonga engine installed
#[derive(Debug, Clone)]
pub struct TongaClient {
    /// Database connection pool
    pool: PgPool,
    /// Connection and default read settings
    config: TongaConfig,
}

impl TongaClient {
    /// Connect using a connection string and default settings
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::new_with_config(TongaConfig::new().with_database_url(database_url)).await
    }

    /// Connect using a full configuration
    pub async fn new_with_config(config: TongaConfig) -> Result<Self> {
        config.validate()?;
        info!(
            database_url = %config.redacted_database_url(),
            "Connecting tonga client"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.database_url)
            .await?;

        info!("Tonga client connected");
        Ok(Self { pool, config })
    }

    /// Create a client over an existing pool
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self::new_with_pool_and_config(pool, TongaConfig::default())
    }

    /// Create a client over an existing pool with custom defaults
    pub fn new_with_pool_and_config(pool: PgPool, config: TongaConfig) -> Self {
        debug!("Creating tonga client with shared connection pool");
        Self { pool, config }
    }

    /// Register a channel bound to `topic`, or rebind an existing one
    #[instrument(skip(self, opts), fields(queue = %queue_name, topic = %topic))]
    pub async fn create_channel(
        &self,
        queue_name: &str,
        topic: &str,
        opts: ChannelOpts,
    ) -> Result<()> {
        validate_channel_name(queue_name)?;
        validate_topic(topic)?;

        let query = match opts.delete_at {
            None => sqlx::query(sql::CREATE_CHANNEL)
                .bind(queue_name)
                .bind(topic)
                .bind(opts.unlogged),
            Some(delete_at) => sqlx::query(sql::CREATE_CHANNEL_WITH_DELETE_AT)
                .bind(queue_name)
                .bind(topic)
                .bind(delete_at)
                .bind(opts.unlogged),
        };
        query.execute(&self.pool).await?;

        info!(
            unlogged = opts.unlogged,
            delete_at = ?opts.delete_at,
            "Channel created: {}", queue_name
        );
        Ok(())
    }

    /// Drop a channel and its messages; returns whether it existed
    #[instrument(skip(self), fields(queue = %queue_name))]
    pub async fn delete_channel(&self, queue_name: &str) -> Result<bool> {
        let existed = sqlx::query_scalar::<_, bool>(sql::DELETE_CHANNEL)
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;

        if existed {
            warn!("Channel deleted: {}", queue_name);
        } else {
            debug!("Channel did not exist: {}", queue_name);
        }
        Ok(existed)
    }

    /// All registered channels, ordered by name
    #[instrument(skip(self))]
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(sql::LIST_CHANNELS)
            .fetch_all(&self.pool)
            .await?;
        Ok(channels)
    }

    /// Serialize `body` to JSON and append it to every channel bound to `topic`
    ///
    /// Returns the number of channels the message reached.
    #[instrument(skip(self, body, opts), fields(topic = %topic, deferred = opts.deliver_at.is_some()))]
    pub async fn send<T>(&self, topic: &str, body: &T, opts: SendOpts) -> Result<u64>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let deliveries = send_on(&self.pool, topic, &body, &opts).await?;

        debug!("Message sent on topic {} to {} channel(s)", topic, deliveries);
        Ok(deliveries)
    }

    /// Send within a caller transaction, so the message is only visible once it commits
    #[instrument(skip(self, body, opts, tx), fields(topic = %topic))]
    pub async fn send_with_transaction<T>(
        &self,
        topic: &str,
        body: &T,
        opts: SendOpts,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<u64>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let deliveries = send_on(&mut **tx, topic, &body, &opts).await?;

        debug!(
            "Message sent in transaction on topic {} to {} channel(s)",
            topic, deliveries
        );
        Ok(deliveries)
    }

    /// Claim up to `quantity` eligible messages, hiding each for `hide_for`
    #[instrument(skip(self), fields(queue = %queue_name, quantity = quantity))]
    pub async fn read(
        &self,
        queue_name: &str,
        quantity: u32,
        hide_for: Duration,
    ) -> Result<Vec<Message>> {
        if quantity == 0 {
            return Ok(Vec::new());
        }

        let messages = sqlx::query_as::<_, Message>(sql::READ)
            .bind(queue_name)
            .bind(i32::try_from(quantity).unwrap_or(i32::MAX))
            .bind(hide_for.as_secs_f64())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TongaError::from_database(e, queue_name))?;

        debug!("Read {} messages from channel: {}", messages.len(), queue_name);
        Ok(messages)
    }

    /// Read using the configured batch size and hide-for window
    pub async fn read_with_defaults(&self, queue_name: &str) -> Result<Vec<Message>> {
        self.read(
            queue_name,
            self.config.default_read_quantity,
            self.config.default_hide_for(),
        )
        .await
    }

    /// Acknowledge a message; returns whether it existed
    #[instrument(skip(self), fields(queue = %queue_name, message_id = id))]
    pub async fn delete(&self, queue_name: &str, id: i64) -> Result<bool> {
        let existed = delete_on(&self.pool, queue_name, id).await?;
        debug!("Message {} deleted from {}: {}", id, queue_name, existed);
        Ok(existed)
    }

    /// Acknowledge a message inside a caller transaction
    #[instrument(skip(self, tx), fields(queue = %queue_name, message_id = id))]
    pub async fn delete_with_transaction(
        &self,
        queue_name: &str,
        id: i64,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<bool> {
        delete_on(&mut **tx, queue_name, id).await
    }

    /// Reclaim channels past their delete-at; returns how many were removed
    #[instrument(skip(self))]
    pub async fn gc(&self) -> Result<u64> {
        let reclaimed = sqlx::query_scalar::<_, i32>(sql::GC)
            .fetch_one(&self.pool)
            .await?;

        if reclaimed > 0 {
            warn!("Garbage collected {} expired channel(s)", reclaimed);
        } else {
            debug!("Garbage collection found nothing to reclaim");
        }
        Ok(u64::try_from(reclaimed).unwrap_or(0))
    }

    /// Message counts for one channel
    #[instrument(skip(self), fields(queue = %queue_name))]
    pub async fn metrics(&self, queue_name: &str) -> Result<ChannelMetrics> {
        let row = sqlx::query(sql::METRICS)
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TongaError::from_database(e, queue_name))?;

        Ok(ChannelMetrics {
            queue_name: queue_name.to_string(),
            total: row.try_get("total")?,
            visible: row.try_get("visible")?,
            hidden: row.try_get("hidden")?,
            deferred: row.try_get("deferred")?,
            oldest_visible_age_seconds: row.try_get("oldest_visible_age_seconds")?,
        })
    }

    /// Get reference to underlying connection pool for advanced operations
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the configuration
    pub fn config(&self) -> &TongaConfig {
        &self.config
    }

    /// Health check - verify database connectivity
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query(sql::HEALTH_CHECK).fetch_one(&self.pool).await {
            Ok(_) => {
                debug!("Health check passed");
                Ok(true)
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Get client status information
    #[instrument(skip(self))]
    pub async fn get_client_status(&self) -> Result<ClientStatus> {
        let healthy = self.health_check().await.unwrap_or(false);

        Ok(ClientStatus {
            client_type: "tonga-postgres".to_string(),
            connected: healthy,
            connection_info: HashMap::from([
                (
                    "backend".to_string(),
                    serde_json::Value::String("postgresql".to_string()),
                ),
                (
                    "pool_size".to_string(),
                    serde_json::Value::Number(self.pool.size().into()),
                ),
                (
                    "idle_connections".to_string(),
                    serde_json::Value::Number(self.pool.num_idle().into()),
                ),
            ]),
            last_activity: Some(chrono::Utc::now()),
        })
    }
}

async fn send_on<'e, E>(
    executor: E,
    topic: &str,
    body: &serde_json::Value,
    opts: &SendOpts,
) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    validate_topic(topic)?;

    let query = match opts.deliver_at {
        None => sqlx::query_scalar::<_, i64>(sql::SEND).bind(topic).bind(body),
        Some(deliver_at) => sqlx::query_scalar::<_, i64>(sql::SEND_WITH_DELIVER_AT)
            .bind(topic)
            .bind(body)
            .bind(deliver_at),
    };
    let deliveries = query.fetch_one(executor).await?;

    Ok(u64::try_from(deliveries).unwrap_or(0))
}

async fn delete_on<'e, E>(executor: E, queue_name: &str, id: i64) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let existed = sqlx::query_scalar::<_, bool>(sql::DELETE)
        .bind(queue_name)
        .bind(id)
        .fetch_one(executor)
        .await?;
    Ok(existed)
}

#[async_trait]
impl MessageQueue for TongaClient {
    async fn create_channel(
        &self,
        queue_name: &str,
        topic: &str,
        opts: ChannelOpts,
    ) -> Result<()> {
        TongaClient::create_channel(self, queue_name, topic, opts).await
    }

    async fn delete_channel(&self, queue_name: &str) -> Result<bool> {
        TongaClient::delete_channel(self, queue_name).await
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        TongaClient::list_channels(self).await
    }

    async fn send_json(
        &self,
        topic: &str,
        body: &serde_json::Value,
        opts: SendOpts,
    ) -> Result<u64> {
        self.send(topic, body, opts).await
    }

    async fn read(
        &self,
        queue_name: &str,
        quantity: u32,
        hide_for: Duration,
    ) -> Result<Vec<Message>> {
        TongaClient::read(self, queue_name, quantity, hide_for).await
    }

    async fn delete(&self, queue_name: &str, id: i64) -> Result<bool> {
        TongaClient::delete(self, queue_name, id).await
    }

    async fn gc(&self) -> Result<u64> {
        TongaClient::gc(self).await
    }

    async fn metrics(&self, queue_name: &str) -> Result<ChannelMetrics> {
        TongaClient::metrics(self, queue_name).await
    }
}
