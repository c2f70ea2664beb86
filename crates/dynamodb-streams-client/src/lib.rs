//! A consumer client for DynamoDB change streams.
//!
//! [`StreamConsumer`] discovers the shards of a table's stream, polls each
//! shard for change records in parallel, periodically re-discovers newly
//! created shards as the table repartitions, and merges every per-shard
//! sequence into one fan-out-capable stream of [`ChangeEvent`]s. Records are
//! ordered within a shard; no order is defined across shards.
//!
//! ```no_run
//! use dynamodb_streams_client::{Config, StreamConsumer};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new("orders", "us-east-1", "AKID...", "SECRET...");
//! let consumer = StreamConsumer::new(config)?;
//! consumer.ready().await?;
//!
//! let mut events = consumer.events();
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?.event_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod protocol;
pub mod transport;

mod api;
mod config;
mod consumer;
mod control;
mod paging;
mod retry;
mod shard_set;

pub use config::Config;
pub use consumer::{ChangeEvent, StreamConsumer};
pub use control::{Ready, StreamSpec};
pub use protocol::{AttributeValue, OperationType, ShardIteratorType, StreamViewType};
pub use shard_set::ShardDescriptor;

use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The HTTP exchange itself failed: connect, reset, timeout, body read.
    #[error("transport failure")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error envelope.
    #[error("{kind}: {message} (HTTP {status})")]
    Api {
        /// The `__type` suffix, e.g. `ExpiredIteratorException`.
        kind: String,
        message: String,
        status: u16,
    },

    /// `DescribeTable` succeeded but the table has no stream specification.
    #[error("table '{table}' has no stream enabled")]
    StreamNotFound { table: String },

    /// A response was well-formed JSON but not the shape the action defines.
    #[error("{0}")]
    Protocol(&'static str),

    #[error("failed to sign request")]
    Sign(#[from] sigv4::Error),

    #[error("failed to decode response body")]
    Decode(#[from] serde_json::Error),
}

/// Remote error kinds which are retried indefinitely with backoff.
const TRANSIENT_KINDS: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
    "LimitExceededException",
    "InternalServerError",
    "ServiceUnavailable",
];

impl Error {
    /// The typed kind of a service error, when this is one.
    pub fn api_kind(&self) -> Option<&str> {
        match self {
            Error::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Whether retrying the same call can be expected to eventually succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) => true,
            Error::Api { kind, status, .. } => {
                *status >= 500 || TRANSIENT_KINDS.contains(&kind.as_str())
            }
            _ => false,
        }
    }

    /// Whether a shard iterator outlived its ~15 minute service-side TTL.
    pub fn is_expired_iterator(&self) -> bool {
        self.api_kind() == Some("ExpiredIteratorException")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A cloneable error, for delivery of one failure to many consumers.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<Error>);

impl SharedError {
    /// The underlying error.
    pub fn inner(&self) -> &Error {
        &self.0
    }
}

impl From<Error> for SharedError {
    fn from(error: Error) -> Self {
        SharedError(Arc::new(error))
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(kind: &str, status: u16) -> Error {
        Error::Api {
            kind: kind.to_string(),
            message: String::new(),
            status,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(api("ProvisionedThroughputExceededException", 400).is_transient());
        assert!(api("ThrottlingException", 400).is_transient());
        assert!(api("InternalServerError", 500).is_transient());
        // Unknown kind, but a 5xx status.
        assert!(api("Anything", 503).is_transient());

        assert!(!api("ValidationException", 400).is_transient());
        assert!(!api("AccessDeniedException", 403).is_transient());
        assert!(!api("ExpiredIteratorException", 400).is_transient());
        assert!(!Error::Protocol("bad shape").is_transient());
    }

    #[test]
    fn test_expired_iterator_detection() {
        assert!(api("ExpiredIteratorException", 400).is_expired_iterator());
        assert!(!api("ThrottlingException", 400).is_expired_iterator());
    }
}
