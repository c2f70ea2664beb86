//! Wire shapes of the DynamoDB and DynamoDB Streams actions this client
//! issues, matching the AWS `x-amz-json-1.0` request and response bodies
//! field for field.
//!
//! Only the fields the client reads or writes are modeled; unrecognized
//! response fields are ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A DynamoDB attribute value in its typed (DynamoDB-JSON) form.
///
/// The externally-tagged serde representation matches the wire exactly:
/// `{"S": "hello"}`, `{"N": "42"}`, `{"M": {...}}`, and so on. Binary
/// payloads (`B`, `BS`) are carried in their wire form, base64 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
    SS(Vec<String>),
    NS(Vec<String>),
    BS(Vec<String>),
}

pub type AttributeMap = HashMap<String, AttributeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamViewType {
    KeysOnly,
    NewImage,
    OldImage,
    NewAndOldImages,
}

impl Default for StreamViewType {
    fn default() -> Self {
        Self::NewAndOldImages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Updating,
    Deleting,
    Active,
    InaccessibleEncryptionCredentials,
    Archiving,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Enabling,
    Enabled,
    Disabling,
    Disabled,
}

/// Where a fresh shard iterator is positioned within the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardIteratorType {
    TrimHorizon,
    Latest,
    AtSequenceNumber,
    AfterSequenceNumber,
}

impl Default for ShardIteratorType {
    fn default() -> Self {
        Self::Latest
    }
}

/// The kind of table mutation a stream record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
}

// --- DescribeTable / UpdateTable (control plane) ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTableRequest {
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTableResponse {
    pub table: Option<TableDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    pub table_name: Option<String>,
    pub table_status: Option<TableStatus>,
    pub stream_specification: Option<StreamSpecification>,
    pub latest_stream_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamSpecification {
    pub stream_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<StreamViewType>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateTableRequest {
    pub table_name: String,
    pub stream_specification: StreamSpecification,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateTableResponse {
    pub table_description: Option<TableDescription>,
}

// --- ListStreams / DescribeStream (streams control) ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListStreamsRequest {
    pub table_name: String,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_start_stream_arn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListStreamsResponse {
    #[serde(default)]
    pub streams: Vec<StreamSummary>,
    pub last_evaluated_stream_arn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamSummary {
    pub stream_arn: String,
    pub stream_label: Option<String>,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeStreamRequest {
    pub stream_arn: String,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_start_shard_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeStreamResponse {
    pub stream_description: StreamDescription,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamDescription {
    pub stream_arn: String,
    pub stream_label: Option<String>,
    pub stream_status: Option<StreamStatus>,
    pub stream_view_type: Option<StreamViewType>,
    pub table_name: Option<String>,
    #[serde(default)]
    pub shards: Vec<Shard>,
    pub last_evaluated_shard_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Shard {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    pub sequence_number_range: Option<SequenceNumberRange>,
}

impl Shard {
    /// A shard is closed once its sequence range has an upper bound; its
    /// remaining records are finite.
    pub fn is_closed(&self) -> bool {
        self.sequence_number_range
            .as_ref()
            .map(|range| range.ending_sequence_number.is_some())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SequenceNumberRange {
    pub starting_sequence_number: Option<String>,
    pub ending_sequence_number: Option<String>,
}

// --- GetShardIterator / GetRecords (data plane) ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetShardIteratorRequest {
    pub stream_arn: String,
    pub shard_id: String,
    pub shard_iterator_type: ShardIteratorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetShardIteratorResponse {
    pub shard_iterator: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRecordsRequest {
    pub shard_iterator: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRecordsResponse {
    #[serde(default)]
    pub records: Vec<Record>,
    pub next_shard_iterator: Option<String>,
}

/// One change record as returned by `GetRecords`. Unlike every other shape
/// in this protocol, the record envelope uses lowerCamelCase field names on
/// the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    #[serde(rename = "eventID")]
    pub event_id: String,
    #[serde(rename = "eventName")]
    pub event_name: Option<OperationType>,
    #[serde(rename = "eventVersion")]
    pub event_version: Option<String>,
    #[serde(rename = "eventSource")]
    pub event_source: Option<String>,
    #[serde(rename = "awsRegion")]
    pub aws_region: Option<String>,
    pub dynamodb: Option<StreamRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecord {
    pub approximate_creation_date_time: Option<f64>,
    pub keys: Option<AttributeMap>,
    pub new_image: Option<AttributeMap>,
    pub old_image: Option<AttributeMap>,
    pub sequence_number: Option<String>,
    pub size_bytes: Option<u64>,
    pub stream_view_type: Option<StreamViewType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_value_wire_form() {
        let value: AttributeValue = serde_json::from_str(r#"{"S": "hello"}"#).unwrap();
        assert_eq!(value, AttributeValue::S("hello".to_string()));

        let value: AttributeValue = serde_json::from_str(r#"{"BOOL": true}"#).unwrap();
        assert_eq!(value, AttributeValue::Bool(true));

        let value: AttributeValue =
            serde_json::from_str(r#"{"M": {"n": {"N": "1.5"}}}"#).unwrap();
        let AttributeValue::M(map) = value else {
            panic!("expected M");
        };
        assert_eq!(map["n"], AttributeValue::N("1.5".to_string()));

        assert_eq!(
            serde_json::to_string(&AttributeValue::Null(true)).unwrap(),
            r#"{"NULL":true}"#,
        );
        assert_eq!(
            serde_json::to_string(&AttributeValue::SS(vec!["a".into(), "b".into()])).unwrap(),
            r#"{"SS":["a","b"]}"#,
        );
    }

    #[test]
    fn test_record_envelope_field_casing() {
        let record: Record = serde_json::from_str(
            r#"{
                "awsRegion": "us-east-1",
                "eventID": "e1",
                "eventName": "INSERT",
                "eventSource": "aws:dynamodb",
                "eventVersion": "1.1",
                "dynamodb": {
                    "ApproximateCreationDateTime": 1700000000.0,
                    "Keys": {"id": {"S": "a"}},
                    "SequenceNumber": "111",
                    "SizeBytes": 26,
                    "StreamViewType": "NEW_AND_OLD_IMAGES"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(record.event_id, "e1");
        assert_eq!(record.event_name, Some(OperationType::Insert));
        let data = record.dynamodb.unwrap();
        assert_eq!(data.sequence_number.as_deref(), Some("111"));
        assert_eq!(data.stream_view_type, Some(StreamViewType::NewAndOldImages));
    }

    #[test]
    fn test_request_serialization_omits_absent_continuations() {
        let body = serde_json::to_value(&ListStreamsRequest {
            table_name: "orders".to_string(),
            limit: 100,
            exclusive_start_stream_arn: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"TableName": "orders", "Limit": 100}),
        );

        let body = serde_json::to_value(&GetShardIteratorRequest {
            stream_arn: "arn:s".to_string(),
            shard_id: "shard-0".to_string(),
            shard_iterator_type: ShardIteratorType::TrimHorizon,
            sequence_number: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "StreamArn": "arn:s",
                "ShardId": "shard-0",
                "ShardIteratorType": "TRIM_HORIZON"
            }),
        );
    }

    #[test]
    fn test_shard_closed_detection() {
        let open: Shard = serde_json::from_str(
            r#"{"ShardId": "s1", "SequenceNumberRange": {"StartingSequenceNumber": "1"}}"#,
        )
        .unwrap();
        assert!(!open.is_closed());

        let closed: Shard = serde_json::from_str(
            r#"{
                "ShardId": "s1",
                "SequenceNumberRange": {
                    "StartingSequenceNumber": "1",
                    "EndingSequenceNumber": "9"
                }
            }"#,
        )
        .unwrap();
        assert!(closed.is_closed());
    }
}
