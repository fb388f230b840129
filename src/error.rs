//! Error types for tonga

use thiserror::Error;

/// Result type for tonga operations
pub type Result<T> = std::result::Result<T, TongaError>;

/// SQLSTATE raised by the engine functions when a channel does not exist (`no_data_found`)
pub const CHANNEL_NOT_FOUND_SQLSTATE: &str = "P0002";

/// Errors that can occur in tonga operations
#[derive(Error, Debug)]
pub enum TongaError {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configuration source could not be loaded
    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    /// Channel name is not usable as a table suffix
    #[error("Invalid channel name: {name}")]
    InvalidChannelName { name: String },

    /// Argument rejected before reaching the database
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Channel is not registered
    #[error("Channel not found: {name}")]
    ChannelNotFound { name: String },

    /// Schema installation failed
    #[error("Migration error: {message}")]
    Migration { message: String },
}

impl TongaError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid channel name error
    pub fn invalid_channel_name<S: Into<String>>(name: S) -> Self {
        Self::InvalidChannelName { name: name.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a channel not found error
    pub fn channel_not_found<S: Into<String>>(name: S) -> Self {
        Self::ChannelNotFound { name: name.into() }
    }

    /// Create a migration error
    pub fn migration<S: Into<String>>(message: S) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Translate a driver error, recognising the engine's missing-channel signal
    pub fn from_database(err: sqlx::Error, channel: &str) -> Self {
        let missing = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == CHANNEL_NOT_FOUND_SQLSTATE);

        if missing {
            Self::channel_not_found(channel)
        } else {
            Self::Database(err)
        }
    }

    /// Whether the error reports an unknown channel
    pub fn is_channel_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound { .. })
    }
}
