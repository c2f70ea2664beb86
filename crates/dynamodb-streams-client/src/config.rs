//! Consumer configuration.

use crate::protocol::{ShardIteratorType, StreamViewType};
use crate::transport::Service;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Everything a [`crate::StreamConsumer`] needs to know: the table, the
/// credentials and region used for signing, and the polling knobs.
///
/// Deserializable so it can live in an application's own config file;
/// duration fields accept humantime strings (`"15s"`, `"500ms"`).
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Table whose stream is consumed.
    pub table: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,

    /// Override of the table control-plane endpoint (local stacks, tests).
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Override of the streams data-plane endpoint.
    #[serde(default)]
    pub streams_endpoint: Option<Url>,

    /// View type used if the client has to create the stream.
    #[serde(default)]
    pub stream_view_type: StreamViewType,
    /// Initial iterator type for shards present at startup. Shards
    /// discovered later by a refresh always start at `TRIM_HORIZON`.
    #[serde(default)]
    pub shard_iterator_type: ShardIteratorType,

    #[serde(default = "default_get_records_limit")]
    pub get_records_limit: u32,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub get_records_interval: Duration,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub get_shards_interval: Duration,
    #[serde(default = "default_shard_update_period", with = "humantime_serde")]
    pub shard_update_period: Duration,
    #[serde(default = "default_list_streams_limit")]
    pub list_streams_limit: u32,

    /// Whether construction kicks off the ready procedure immediately.
    #[serde(default = "default_true")]
    pub auto_ready: bool,
    /// Emit key and image payloads as plain JSON instead of DynamoDB-JSON.
    #[serde(default)]
    pub json_mode: bool,
}

impl Config {
    pub fn new(
        table: impl Into<String>,
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            endpoint: None,
            streams_endpoint: None,
            stream_view_type: StreamViewType::default(),
            shard_iterator_type: ShardIteratorType::default(),
            get_records_limit: default_get_records_limit(),
            get_records_interval: default_poll_interval(),
            get_shards_interval: default_poll_interval(),
            shard_update_period: default_shard_update_period(),
            list_streams_limit: default_list_streams_limit(),
            auto_ready: default_true(),
            json_mode: false,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_shard_iterator_type(mut self, iterator_type: ShardIteratorType) -> Self {
        self.shard_iterator_type = iterator_type;
        self
    }

    pub fn with_stream_view_type(mut self, view_type: StreamViewType) -> Self {
        self.stream_view_type = view_type;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub(crate) fn credentials(&self) -> sigv4::Credentials {
        let credentials =
            sigv4::Credentials::new(self.access_key_id.clone(), self.secret_access_key.clone());
        match &self.session_token {
            Some(token) => credentials.with_session_token(token.clone()),
            None => credentials,
        }
    }

    pub(crate) fn control_endpoint(&self) -> Result<Url> {
        resolve_endpoint(&self.endpoint, Service::DynamoDb, &self.region)
    }

    pub(crate) fn streams_endpoint(&self) -> Result<Url> {
        resolve_endpoint(&self.streams_endpoint, Service::DynamoDbStreams, &self.region)
    }
}

fn resolve_endpoint(overridden: &Option<Url>, service: Service, region: &str) -> Result<Url> {
    match overridden {
        Some(url) => Ok(url.clone()),
        None => Url::parse(&service.default_endpoint(region))
            .map_err(|_| Error::Protocol("region does not form a valid endpoint URL")),
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("table", &self.table)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("stream_view_type", &self.stream_view_type)
            .field("shard_iterator_type", &self.shard_iterator_type)
            .field("get_records_limit", &self.get_records_limit)
            .field("get_records_interval", &self.get_records_interval)
            .field("get_shards_interval", &self.get_shards_interval)
            .field("shard_update_period", &self.shard_update_period)
            .field("list_streams_limit", &self.list_streams_limit)
            .field("auto_ready", &self.auto_ready)
            .field("json_mode", &self.json_mode)
            .finish_non_exhaustive()
    }
}

fn default_get_records_limit() -> u32 {
    1000
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_shard_update_period() -> Duration {
    Duration::from_secs(15)
}
fn default_list_streams_limit() -> u32 {
    100
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("orders", "us-east-1", "akid", "secret");
        assert_eq!(config.stream_view_type, StreamViewType::NewAndOldImages);
        assert_eq!(config.shard_iterator_type, ShardIteratorType::Latest);
        assert_eq!(config.get_records_limit, 1000);
        assert_eq!(config.get_records_interval, Duration::from_secs(1));
        assert_eq!(config.get_shards_interval, Duration::from_secs(1));
        assert_eq!(config.shard_update_period, Duration::from_secs(15));
        assert_eq!(config.list_streams_limit, 100);
        assert!(config.auto_ready);
        assert!(!config.json_mode);
    }

    #[test]
    fn test_deserialize_with_humantime_durations() {
        let config: Config = serde_json::from_str(
            r#"{
                "table": "orders",
                "region": "eu-central-1",
                "access_key_id": "akid",
                "secret_access_key": "secret",
                "shard_update_period": "30s",
                "get_records_interval": "250ms",
                "json_mode": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.shard_update_period, Duration::from_secs(30));
        assert_eq!(config.get_records_interval, Duration::from_millis(250));
        assert!(config.json_mode);
        assert!(config.auto_ready);
    }

    #[test]
    fn test_endpoints() {
        let mut config = Config::new("orders", "us-west-2", "akid", "secret");
        assert_eq!(
            config.control_endpoint().unwrap().as_str(),
            "https://dynamodb.us-west-2.amazonaws.com/",
        );
        assert_eq!(
            config.streams_endpoint().unwrap().as_str(),
            "https://streams.dynamodb.us-west-2.amazonaws.com/",
        );

        config.endpoint = Some(Url::parse("http://localhost:8000").unwrap());
        assert_eq!(
            config.control_endpoint().unwrap().as_str(),
            "http://localhost:8000/",
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::new("orders", "us-east-1", "akid", "super-secret")
            .with_session_token("session-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("session-secret"));
        assert!(rendered.contains("akid"));
    }
}
