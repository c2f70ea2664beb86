//! The lazy paging sequences: streams of a table, shards of a stream, and
//! records of a shard. Each hides its continuation token, wraps remote
//! calls in the transient-retry policy, and is single-pass.

use crate::api;
use crate::protocol::{
    DescribeStreamRequest, GetRecordsRequest, GetShardIteratorRequest, ListStreamsRequest, Record,
    ShardIteratorType,
};
use crate::retry::{with_retries, TransientBackoff};
use crate::shard_set::ShardDescriptor;
use crate::Result;
use futures::{Stream, TryStreamExt};
use std::collections::VecDeque;
use std::time::Duration;

const DESCRIBE_STREAM_PAGE_LIMIT: u32 = 100;

/// The stream ARNs currently exposed for `table`, in listing order.
pub(crate) fn stream_arns(
    client: api::Client,
    table: String,
    page_limit: u32,
) -> impl Stream<Item = Result<String>> {
    struct State {
        client: api::Client,
        table: String,
        page_limit: u32,
        cursor: Option<String>,
        buffer: VecDeque<String>,
        exhausted: bool,
        retry: TransientBackoff,
    }

    let state = State {
        client,
        table,
        page_limit,
        cursor: None,
        buffer: VecDeque::new(),
        exhausted: false,
        retry: TransientBackoff::default(),
    };

    futures::stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(arn) = state.buffer.pop_front() {
                return Ok(Some((arn, state)));
            }
            if state.exhausted {
                return Ok(None);
            }

            let request = ListStreamsRequest {
                table_name: state.table.clone(),
                limit: state.page_limit,
                exclusive_start_stream_arn: state.cursor.take(),
            };
            let State { client, retry, .. } = &mut state;
            let response = with_retries(retry, || client.list_streams(&request)).await?;

            state.cursor = response.last_evaluated_stream_arn;
            state.exhausted = state.cursor.is_none();
            state
                .buffer
                .extend(response.streams.into_iter().map(|s| s.stream_arn));
        }
    })
}

/// The shards of one stream, each annotated with the stream's ARN.
/// Successive pages are separated by `page_interval` of quiet.
pub(crate) fn stream_shards(
    client: api::Client,
    stream_arn: String,
    page_interval: Duration,
) -> impl Stream<Item = Result<ShardDescriptor>> {
    struct State {
        client: api::Client,
        stream_arn: String,
        page_interval: Duration,
        cursor: Option<String>,
        buffer: VecDeque<ShardDescriptor>,
        exhausted: bool,
        fetched_once: bool,
        retry: TransientBackoff,
    }

    let state = State {
        client,
        stream_arn,
        page_interval,
        cursor: None,
        buffer: VecDeque::new(),
        exhausted: false,
        fetched_once: false,
        retry: TransientBackoff::default(),
    };

    futures::stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(shard) = state.buffer.pop_front() {
                return Ok(Some((shard, state)));
            }
            if state.exhausted {
                return Ok(None);
            }

            if state.fetched_once {
                tokio::time::sleep(state.page_interval).await;
            }
            state.fetched_once = true;

            let request = DescribeStreamRequest {
                stream_arn: state.stream_arn.clone(),
                limit: DESCRIBE_STREAM_PAGE_LIMIT,
                exclusive_start_shard_id: state.cursor.take(),
            };
            let State { client, retry, .. } = &mut state;
            let description = with_retries(retry, || client.describe_stream(&request))
                .await?
                .stream_description;

            state.cursor = description.last_evaluated_shard_id;
            state.exhausted = state.cursor.is_none();
            let stream_arn = state.stream_arn.clone();
            state
                .buffer
                .extend(description.shards.into_iter().map(|shard| ShardDescriptor {
                    stream_arn: stream_arn.clone(),
                    shard_id: shard.shard_id,
                    parent_shard_id: shard.parent_shard_id,
                    sequence_number_range: shard.sequence_number_range,
                }));
        }
    })
}

/// One element of a shard's record sequence.
pub(crate) enum ShardItem {
    Record(Record),
    /// The shard iterator outlived its service-side TTL before the shard
    /// closed. Terminal: the sequence ends after this item, and the shard
    /// is expected to be re-discovered by a later refresh.
    Expired,
}

/// The records of one shard, polled until the shard closes.
///
/// Obtains an iterator, then loops `GetRecords` with `poll_interval` of
/// quiet between calls. The sequence ends cleanly when a page carries no
/// next iterator (the shard closed), and ends with [`ShardItem::Expired`]
/// when the iterator aged out.
pub(crate) fn shard_records(
    client: api::Client,
    stream_arn: String,
    shard_id: String,
    iterator_type: ShardIteratorType,
    page_limit: u32,
    poll_interval: Duration,
) -> impl Stream<Item = Result<ShardItem>> {
    enum Cursor {
        Fresh,
        Iterator(String),
        End,
    }

    struct State {
        client: api::Client,
        stream_arn: String,
        shard_id: String,
        iterator_type: ShardIteratorType,
        page_limit: u32,
        poll_interval: Duration,
        cursor: Cursor,
        buffer: VecDeque<Record>,
        polled_once: bool,
        retry: TransientBackoff,
    }

    let state = State {
        client,
        stream_arn,
        shard_id,
        iterator_type,
        page_limit,
        poll_interval,
        cursor: Cursor::Fresh,
        buffer: VecDeque::new(),
        polled_once: false,
        retry: TransientBackoff::default(),
    };

    futures::stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.buffer.pop_front() {
                return Ok(Some((ShardItem::Record(record), state)));
            }

            match std::mem::replace(&mut state.cursor, Cursor::End) {
                Cursor::End => return Ok(None),

                Cursor::Fresh => {
                    let request = GetShardIteratorRequest {
                        stream_arn: state.stream_arn.clone(),
                        shard_id: state.shard_id.clone(),
                        shard_iterator_type: state.iterator_type,
                        sequence_number: None,
                    };
                    let State { client, retry, .. } = &mut state;
                    match with_retries(retry, || client.get_shard_iterator(&request)).await {
                        Ok(response) => match response.shard_iterator {
                            Some(iterator) => state.cursor = Cursor::Iterator(iterator),
                            None => return Ok(None),
                        },
                        Err(error) if error.is_expired_iterator() => {
                            tracing::debug!(shard = %state.shard_id, "shard iterator expired");
                            return Ok(Some((ShardItem::Expired, state)));
                        }
                        Err(error) => return Err(error),
                    }
                }

                Cursor::Iterator(iterator) => {
                    if state.polled_once {
                        tokio::time::sleep(state.poll_interval).await;
                    }
                    state.polled_once = true;

                    let request = GetRecordsRequest {
                        shard_iterator: iterator,
                        limit: state.page_limit,
                    };
                    let State { client, retry, .. } = &mut state;
                    match with_retries(retry, || client.get_records(&request)).await {
                        Ok(page) => {
                            state.buffer.extend(page.records);
                            match page.next_shard_iterator {
                                Some(next) => state.cursor = Cursor::Iterator(next),
                                None => {
                                    tracing::debug!(shard = %state.shard_id, "shard closed");
                                    state.cursor = Cursor::End;
                                }
                            }
                        }
                        Err(error) if error.is_expired_iterator() => {
                            tracing::debug!(shard = %state.shard_id, "shard iterator expired");
                            return Ok(Some((ShardItem::Expired, state)));
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
        }
    })
}

/// Flatten the shards of every stream of `table` into one snapshot.
///
/// Enumeration is sequential: at most one `ListStreams` and one
/// `DescribeStream` page is in flight at any time.
pub(crate) async fn list_all_shards(
    client: &api::Client,
    table: &str,
    list_streams_limit: u32,
    page_interval: Duration,
) -> Result<Vec<ShardDescriptor>> {
    let arns: Vec<String> = stream_arns(client.clone(), table.to_string(), list_streams_limit)
        .try_collect()
        .await?;

    let mut shards = Vec::new();
    for arn in arns {
        let mut stream = std::pin::pin!(stream_shards(client.clone(), arn, page_interval));
        while let Some(shard) = stream.try_next().await? {
            shards.push(shard);
        }
    }
    Ok(shards)
}
