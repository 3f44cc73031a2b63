//! Error types for the hop middleware.
//!
//! Only [`ConfigError`] ever reaches the caller synchronously. Everything that
//! happens after construction is reported as a [`HopError`] to the log and to
//! the optional error observer, and never to the request pipeline.

use thiserror::Error;

/// Boxed error returned by custom route resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building a [`HopLayer`](crate::HopLayer).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The broker URL could not be parsed into an AMQP URI.
    #[error("Invalid broker URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The exchange name was empty.
    #[error("Exchange name must not be empty")]
    EmptyExchange,

    /// No Tokio runtime is available to drive the broker bootstrap.
    #[error("Missing async runtime for broker connection: {0}")]
    NoRuntime(String),

    /// Environment variables could not be deserialized.
    #[cfg(feature = "config")]
    #[error("Configuration error: {0}")]
    Env(#[from] envy::Error),
}

/// Errors reported by a [`BrokerChannel`](crate::broker::BrokerChannel).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Error from the AMQP client.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker refused an operation because of conflicting state,
    /// e.g. re-declaring an exchange with a different kind.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The connection or channel went away before the operation completed.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised inside the detached bootstrap and publish tasks.
#[derive(Debug, Error)]
pub enum HopError {
    /// Connecting, opening the channel or declaring the exchange failed.
    #[error("Broker bootstrap failed: {0}")]
    Bootstrap(#[source] BrokerError),

    /// The route resolver failed for a request.
    #[error("Route resolution failed: {0}")]
    Resolve(#[source] BoxError),

    /// The envelope could not be serialized.
    #[error("Envelope serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker rejected the publish.
    #[error("Publish failed: {0}")]
    Publish(#[source] BrokerError),
}

/// Result type for the publish path.
pub type Result<T, E = HopError> = std::result::Result<T, E>;
