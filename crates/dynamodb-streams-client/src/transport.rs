//! The signed HTTP seam between the client and AWS.
//!
//! Every action is an HTTPS `POST /` with an `X-Amz-Target` header naming
//! the operation and an `x-amz-json-1.0` body. [`Transport`] is the one
//! operation the rest of the crate consumes; [`SignedTransport`] is the
//! production implementation, and tests substitute scripted ones.

use crate::{Config, Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use url::Url;

/// The two AWS services the client speaks to. Both sign as `dynamodb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// The table control plane: `DescribeTable`, `UpdateTable`.
    DynamoDb,
    /// The streams data plane: `ListStreams` through `GetRecords`.
    DynamoDbStreams,
}

impl Service {
    /// The `X-Amz-Target` prefix of this service's actions.
    pub fn target_prefix(&self) -> &'static str {
        match self {
            Service::DynamoDb => "DynamoDB_20120810",
            Service::DynamoDbStreams => "DynamoDBStreams_20120810",
        }
    }

    /// The regional endpoint used when the config carries no override.
    pub fn default_endpoint(&self, region: &str) -> String {
        match self {
            Service::DynamoDb => format!("https://dynamodb.{region}.amazonaws.com"),
            Service::DynamoDbStreams => {
                format!("https://streams.dynamodb.{region}.amazonaws.com")
            }
        }
    }
}

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SIGNING_SERVICE: &str = "dynamodb";

/// A single signed action dispatch. Implementations must be safe for
/// concurrent use: one transport is shared by every shard producer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `action` against `service` with the given JSON payload,
    /// returning the parsed response body. No retries at this layer.
    async fn call(&self, service: Service, action: &str, payload: Value) -> Result<Value>;
}

/// The production [`Transport`]: signs with SigV4 and dispatches over a
/// shared `reqwest` client.
pub struct SignedTransport {
    http: reqwest::Client,
    credentials: sigv4::Credentials,
    region: String,
    control_endpoint: Url,
    streams_endpoint: Url,
}

impl SignedTransport {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            credentials: config.credentials(),
            region: config.region.clone(),
            control_endpoint: config.control_endpoint()?,
            streams_endpoint: config.streams_endpoint()?,
        })
    }

    fn endpoint(&self, service: Service) -> &Url {
        match service {
            Service::DynamoDb => &self.control_endpoint,
            Service::DynamoDbStreams => &self.streams_endpoint,
        }
    }
}

#[async_trait]
impl Transport for SignedTransport {
    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn call(&self, service: Service, action: &str, payload: Value) -> Result<Value> {
        let endpoint = self.endpoint(service);
        let body = serde_json::to_vec(&payload)?;

        let host = host_header(endpoint)?;
        let target = format!("{}.{action}", service.target_prefix());
        let now = OffsetDateTime::now_utc();
        let timestamp = sigv4::amz_date(now)?;
        let payload_hash = sigv4::sha256_hex(&body);

        let mut headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), host),
            ("x-amz-date".to_string(), timestamp),
            ("x-amz-target".to_string(), target),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let authorization = sigv4::authorization_header(
            &self.credentials,
            &sigv4::SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                headers: &headers,
                payload_hash: &payload_hash,
            },
            now,
            &self.region,
            SIGNING_SERVICE,
        )?;

        let mut request = self.http.post(endpoint.clone());
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        let response = request
            .header("authorization", authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(parse_error_envelope(status, &bytes));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// The `Host` header value of an endpoint, including any non-default port.
fn host_header(endpoint: &Url) -> Result<String> {
    let host = endpoint
        .host_str()
        .ok_or(Error::Protocol("endpoint URL has no host"))?;
    Ok(match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Parse the AWS error envelope `{"__type": "...#Kind", "message": "..."}`
/// into a typed error. Bodies that are not the envelope (proxies, load
/// balancers) keep the HTTP status as their only classification.
pub fn parse_error_envelope(status: u16, body: &[u8]) -> Error {
    let envelope: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            return Error::Api {
                kind: "UnknownError".to_string(),
                message: String::from_utf8_lossy(body).into_owned(),
                status,
            }
        }
    };

    let kind = envelope
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "UnknownError".to_string());
    let message = ["message", "Message"]
        .iter()
        .find_map(|key| envelope.get(key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Error::Api {
        kind,
        message,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_with_namespace() {
        let error = parse_error_envelope(
            400,
            br#"{"__type":"com.amazonaws.dynamodb.v20120810#ExpiredIteratorException","message":"Iterator expired"}"#,
        );
        let Error::Api {
            kind,
            message,
            status,
        } = error
        else {
            panic!("expected Api error");
        };
        assert_eq!(kind, "ExpiredIteratorException");
        assert_eq!(message, "Iterator expired");
        assert_eq!(status, 400);
    }

    #[test]
    fn test_error_envelope_without_namespace_and_upper_message() {
        let error = parse_error_envelope(
            400,
            br#"{"__type":"ValidationException","Message":"Bad request"}"#,
        );
        assert_eq!(error.api_kind(), Some("ValidationException"));
        assert!(error.to_string().contains("Bad request"));
    }

    #[test]
    fn test_error_envelope_fallback_for_non_json_body() {
        let error = parse_error_envelope(502, b"<html>bad gateway</html>");
        assert_eq!(error.api_kind(), Some("UnknownError"));
        assert!(error.is_transient());
    }

    #[test]
    fn test_service_endpoints_and_targets() {
        assert_eq!(
            Service::DynamoDb.default_endpoint("eu-west-1"),
            "https://dynamodb.eu-west-1.amazonaws.com",
        );
        assert_eq!(
            Service::DynamoDbStreams.default_endpoint("eu-west-1"),
            "https://streams.dynamodb.eu-west-1.amazonaws.com",
        );
        assert_eq!(Service::DynamoDb.target_prefix(), "DynamoDB_20120810");
        assert_eq!(
            Service::DynamoDbStreams.target_prefix(),
            "DynamoDBStreams_20120810",
        );
    }

    #[test]
    fn test_host_header_includes_port() {
        let url = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(host_header(&url).unwrap(), "localhost:8000");

        let url = Url::parse("https://dynamodb.us-east-1.amazonaws.com").unwrap();
        assert_eq!(
            host_header(&url).unwrap(),
            "dynamodb.us-east-1.amazonaws.com",
        );
    }
}
