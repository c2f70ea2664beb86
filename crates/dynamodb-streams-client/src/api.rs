//! The typed action facade over a [`Transport`].

use crate::protocol::*;
use crate::transport::{Service, Transport};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// One typed method per wire action, each a serde round-trip through the
/// shared transport. Cheap to clone; all clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call<Req, Resp>(&self, service: Service, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let response = self.transport.call(service, action, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    #[tracing::instrument(level = "trace", skip_all, fields(table = %request.table_name))]
    pub async fn describe_table(
        &self,
        request: &DescribeTableRequest,
    ) -> Result<DescribeTableResponse> {
        self.call(Service::DynamoDb, "DescribeTable", request).await
    }

    #[tracing::instrument(level = "trace", skip_all, fields(table = %request.table_name))]
    pub async fn update_table(&self, request: &UpdateTableRequest) -> Result<UpdateTableResponse> {
        self.call(Service::DynamoDb, "UpdateTable", request).await
    }

    #[tracing::instrument(level = "trace", skip_all, fields(table = %request.table_name))]
    pub async fn list_streams(&self, request: &ListStreamsRequest) -> Result<ListStreamsResponse> {
        self.call(Service::DynamoDbStreams, "ListStreams", request)
            .await
    }

    #[tracing::instrument(level = "trace", skip_all, fields(stream = %request.stream_arn))]
    pub async fn describe_stream(
        &self,
        request: &DescribeStreamRequest,
    ) -> Result<DescribeStreamResponse> {
        self.call(Service::DynamoDbStreams, "DescribeStream", request)
            .await
    }

    #[tracing::instrument(level = "trace", skip_all, fields(shard = %request.shard_id))]
    pub async fn get_shard_iterator(
        &self,
        request: &GetShardIteratorRequest,
    ) -> Result<GetShardIteratorResponse> {
        self.call(Service::DynamoDbStreams, "GetShardIterator", request)
            .await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn get_records(&self, request: &GetRecordsRequest) -> Result<GetRecordsResponse> {
        self.call(Service::DynamoDbStreams, "GetRecords", request)
            .await
    }
}
