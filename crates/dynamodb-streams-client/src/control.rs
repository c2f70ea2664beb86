//! Table control: making sure the stream exists and the table is active
//! before any shard is polled.

use crate::api;
use crate::protocol::{
    DescribeTableRequest, StreamSpecification, StreamViewType, TableStatus, UpdateTableRequest,
};
use crate::{Error, Result};
use std::time::Duration;

/// How the ready procedure concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// The table already had a stream enabled.
    StreamExists,
    /// The client enabled the stream itself.
    CreatedStream,
}

/// A snapshot of the table's stream specification. Never mutated in place;
/// re-fetched when fresher state is needed.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub enabled: bool,
    pub view_type: Option<StreamViewType>,
    pub table_status: Option<TableStatus>,
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fetch the current stream specification of `table`.
///
/// Fails with [`Error::StreamNotFound`] when the table exists but has no
/// stream specification at all.
pub(crate) async fn describe_stream_spec(client: &api::Client, table: &str) -> Result<StreamSpec> {
    let response = client
        .describe_table(&DescribeTableRequest {
            table_name: table.to_string(),
        })
        .await?;
    let description = response
        .table
        .ok_or(Error::Protocol("DescribeTable response is missing Table"))?;

    match description.stream_specification {
        Some(spec) => Ok(StreamSpec {
            enabled: spec.stream_enabled.unwrap_or_default(),
            view_type: spec.stream_view_type,
            table_status: description.table_status,
        }),
        None => Err(Error::StreamNotFound {
            table: table.to_string(),
        }),
    }
}

/// Enable the table's stream with the requested view type.
pub(crate) async fn create_stream(
    client: &api::Client,
    table: &str,
    view_type: StreamViewType,
) -> Result<()> {
    client
        .update_table(&UpdateTableRequest {
            table_name: table.to_string(),
            stream_specification: StreamSpecification {
                stream_enabled: Some(true),
                stream_view_type: Some(view_type),
            },
        })
        .await?;
    Ok(())
}

/// Poll `DescribeTable` until the table reports `ACTIVE`.
///
/// A missing stream specification means the table is still settling and we
/// keep waiting; any other error is fatal.
pub(crate) async fn wait_for_active(client: &api::Client, table: &str) -> Result<()> {
    loop {
        match describe_stream_spec(client, table).await {
            Ok(spec) if spec.table_status == Some(TableStatus::Active) => return Ok(()),
            Ok(_) | Err(Error::StreamNotFound { .. }) => {}
            Err(error) => return Err(error),
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// The one-shot startup procedure: verify the stream exists and the table
/// is active, enabling the stream first if the table doesn't have one.
pub(crate) async fn ready(
    client: api::Client,
    table: String,
    view_type: StreamViewType,
) -> Result<Ready> {
    match describe_stream_spec(&client, &table).await {
        Ok(_) => {
            wait_for_active(&client, &table).await?;
            tracing::debug!(%table, "stream already enabled");
            Ok(Ready::StreamExists)
        }
        Err(Error::StreamNotFound { .. }) => {
            tracing::info!(%table, "table has no stream, enabling one");
            create_stream(&client, &table, view_type).await?;
            wait_for_active(&client, &table).await?;
            Ok(Ready::CreatedStream)
        }
        Err(error) => Err(error),
    }
}
