//! AWS Signature Version 4 request signing.
//!
//! This crate is a pure function of its inputs: given credentials, the
//! elements of an HTTP request, and a timestamp, it produces the value of the
//! `Authorization` header. It performs no I/O and holds no state, which keeps
//! the transport layer free to decide how requests are actually dispatched.

use hmac::{Hmac, Mac};
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Characters which are NOT percent-encoded within a query string key or
/// value. RFC 3986 unreserved characters only.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// As QUERY_ENCODE, but path segments additionally preserve `/`.
const PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

const AMZ_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");
const SCOPE_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year][month][day]");

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to format signing timestamp")]
    FormatTimestamp(#[from] time::error::Format),
    #[error("invalid HMAC signing key")]
    InvalidKey,
}

/// AWS credentials used to derive the signing key.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Present when the credentials are temporary (STS). The caller is
    /// responsible for also sending it as `X-Amz-Security-Token`.
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

/// The request elements which participate in the signature.
///
/// `headers` must contain every header the caller intends to sign, `Host`
/// and `X-Amz-Date` included. Names are matched case-insensitively.
#[derive(Debug)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a [(String, String)],
    /// Lowercase hex SHA-256 of the request payload.
    pub payload_hash: &'a str,
}

/// Lowercase hex SHA-256 digest, as used for payload hashing.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Format `datetime` in the basic ISO-8601 form carried by `X-Amz-Date`.
pub fn amz_date(datetime: OffsetDateTime) -> Result<String, Error> {
    Ok(datetime.format(&AMZ_DATE_FORMAT)?)
}

/// Compute the `Authorization` header value for a request.
pub fn authorization_header(
    credentials: &Credentials,
    request: &SignableRequest<'_>,
    datetime: OffsetDateTime,
    region: &str,
    service: &str,
) -> Result<String, Error> {
    let date_stamp = datetime.format(&SCOPE_DATE_FORMAT)?;
    let timestamp = amz_date(datetime)?;
    let scope = format!("{date_stamp}/{region}/{service}/aws4_request");

    let (canonical_headers, signed_headers) = canonicalize_headers(request.headers);
    let canonical_path = percent_encode(request.path.as_bytes(), PATH_ENCODE).to_string();
    let canonical_query = canonical_query(request.query);

    let canonical_request = format!(
        "{}\n{canonical_path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{}",
        request.method, request.payload_hash,
    );
    let hashed_request = sha256_hex(canonical_request.as_bytes());
    let string_to_sign = format!("{ALGORITHM}\n{timestamp}\n{scope}\n{hashed_request}");

    let key = signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        region,
        service,
    )?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id,
    ))
}

/// Derive the per-day signing key: a chained HMAC over date, region,
/// service and the `aws4_request` terminator.
fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>, Error> {
    let mut key = hmac(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes())?;
    for part in [region, service, "aws4_request"] {
        key = hmac(&key, part.as_bytes())?;
    }
    Ok(key)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Lowercase, sort, and trim headers into the canonical block, returning it
/// together with the `;`-joined signed-header names.
fn canonicalize_headers(headers: &[(String, String)]) -> (String, String) {
    let mut entries: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), trim_header_value(value)))
        .collect();
    entries.sort();

    let canonical = entries
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = entries
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    (canonical, signed)
}

/// Trim surrounding whitespace and collapse interior runs of spaces.
fn trim_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Percent-encode and sort the query parameters by key, then by value.
fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_encode(key.as_bytes(), QUERY_ENCODE).to_string(),
                percent_encode(value.as_bytes(), QUERY_ENCODE).to_string(),
            )
        })
        .collect();
    params.sort();

    params
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const EMPTY_PAYLOAD_HASH: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn test_credentials() -> Credentials {
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
    }

    fn vanilla_headers() -> Vec<(String, String)> {
        vec![
            ("Host".to_string(), "example.amazonaws.com".to_string()),
            ("X-Amz-Date".to_string(), "20150830T123600Z".to_string()),
        ]
    }

    fn signature_of(authorization: &str) -> &str {
        authorization.rsplit("Signature=").next().unwrap()
    }

    // The `get-vanilla` case of the AWS Signature Version 4 test suite.
    #[test]
    fn test_get_vanilla_suite_vector() {
        let headers = vanilla_headers();
        let authorization = authorization_header(
            &test_credentials(),
            &SignableRequest {
                method: "GET",
                path: "/",
                query: "",
                headers: &headers,
                payload_hash: EMPTY_PAYLOAD_HASH,
            },
            datetime!(2015-08-30 12:36:00 UTC),
            "us-east-1",
            "service",
        )
        .unwrap();

        assert_eq!(
            authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31",
        );
    }

    // The `post-vanilla` case of the AWS Signature Version 4 test suite.
    #[test]
    fn test_post_vanilla_suite_vector() {
        let headers = vanilla_headers();
        let authorization = authorization_header(
            &test_credentials(),
            &SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                headers: &headers,
                payload_hash: EMPTY_PAYLOAD_HASH,
            },
            datetime!(2015-08-30 12:36:00 UTC),
            "us-east-1",
            "service",
        )
        .unwrap();

        assert_eq!(
            signature_of(&authorization),
            "5da7c1a2acd57cee7505fc6676e4e544621c30862966e37dddb68e92efbe5d6b",
        );
    }

    #[test]
    fn test_headers_are_sorted_and_trimmed() {
        let unordered = vec![
            ("X-Amz-Date".to_string(), "20150830T123600Z".to_string()),
            ("Host".to_string(), "  example.amazonaws.com  ".to_string()),
            ("X-Amz-Target".to_string(), "Service.Action   extra".to_string()),
        ];
        let ordered = vec![
            ("Host".to_string(), "example.amazonaws.com".to_string()),
            ("X-Amz-Date".to_string(), "20150830T123600Z".to_string()),
            ("X-Amz-Target".to_string(), "Service.Action extra".to_string()),
        ];

        let request = |headers| SignableRequest {
            method: "POST",
            path: "/",
            query: "",
            headers,
            payload_hash: EMPTY_PAYLOAD_HASH,
        };
        let at = datetime!(2015-08-30 12:36:00 UTC);

        assert_eq!(
            authorization_header(&test_credentials(), &request(&unordered), at, "us-east-1", "service")
                .unwrap(),
            authorization_header(&test_credentials(), &request(&ordered), at, "us-east-1", "service")
                .unwrap(),
        );
    }

    #[test]
    fn test_canonical_query_sorting() {
        assert_eq!(canonical_query(""), "");
        assert_eq!(
            canonical_query("b=2&a=1&a=0"),
            "a=0&a=1&b=2",
        );
        assert_eq!(canonical_query("key=a b"), "key=a%20b");
    }

    #[test]
    fn test_amz_date_format() {
        assert_eq!(
            amz_date(datetime!(2015-08-30 12:36:00 UTC)).unwrap(),
            "20150830T123600Z",
        );
    }
}
