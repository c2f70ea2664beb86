//! The consumer itself: one producer task per live shard, a periodic shard
//! refresh, and a merge loop that fans records out to every subscriber.

use crate::api;
use crate::codec;
use crate::config::Config;
use crate::control::{self, Ready, StreamSpec};
use crate::paging::{self, ShardItem};
use crate::protocol::{AttributeMap, OperationType, Record, ShardIteratorType, StreamViewType};
use crate::shard_set::{ShardDescriptor, ShardSet};
use crate::transport::{SignedTransport, Transport};
use crate::{Result, SharedError};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, Stream, StreamExt, TryFutureExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Capacity of the shared merge channel all producers write into.
const MERGE_BUFFER: usize = 64;

/// Capacity of each subscriber's queue. Delivery awaits queue space, so a
/// subscriber that stops polling stalls the merge loop after this many
/// undelivered events — back-pressure is bounded, never silent loss.
const SUBSCRIBER_BUFFER: usize = 256;

/// A change record as delivered to subscribers: the wire record plus the
/// table and shard it came from.
///
/// `keys`, `old_image` and `new_image` hold the typed DynamoDB-JSON form
/// (`{"S": ...}`, `{"N": ...}`), or plain JSON when the consumer was
/// configured with `json_mode`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub shard_id: String,
    pub event_id: String,
    pub event_name: Option<OperationType>,
    pub event_version: Option<String>,
    pub event_source: Option<String>,
    pub aws_region: Option<String>,
    pub approximate_creation_date_time: Option<f64>,
    pub keys: Option<Value>,
    pub old_image: Option<Value>,
    pub new_image: Option<Value>,
    pub sequence_number: Option<String>,
    pub size_bytes: Option<u64>,
    pub view_type: Option<StreamViewType>,
}

impl ChangeEvent {
    fn from_record(table: &str, shard_id: &str, record: Record, json_mode: bool) -> Result<Self> {
        let data = record.dynamodb;

        let convert = |map: Option<AttributeMap>| -> Result<Option<Value>> {
            match map {
                None => Ok(None),
                Some(map) if json_mode => Ok(Some(codec::map_to_json(&map))),
                Some(map) => Ok(Some(serde_json::to_value(map)?)),
            }
        };

        let (creation_time, keys, old_image, new_image, sequence_number, size_bytes, view_type) =
            match data {
                Some(data) => (
                    data.approximate_creation_date_time,
                    convert(data.keys)?,
                    convert(data.old_image)?,
                    convert(data.new_image)?,
                    data.sequence_number,
                    data.size_bytes,
                    data.stream_view_type,
                ),
                None => (None, None, None, None, None, None, None),
            };

        Ok(Self {
            table: table.to_string(),
            shard_id: shard_id.to_string(),
            event_id: record.event_id,
            event_name: record.event_name,
            event_version: record.event_version,
            event_source: record.event_source,
            aws_region: record.aws_region,
            approximate_creation_date_time: creation_time,
            keys,
            old_image,
            new_image,
            sequence_number,
            size_bytes,
            view_type,
        })
    }
}

type ConsumerItem = std::result::Result<ChangeEvent, SharedError>;
type ReadyFuture = Shared<BoxFuture<'static, std::result::Result<Ready, SharedError>>>;

/// What flows from producers into the merge loop. Only `Record` is ever
/// visible to subscribers.
enum MergeEvent {
    Record(ChangeEvent),
    ShardEnd { shard_id: String, expired: bool },
    Fault { shard_id: String, error: SharedError },
}

/// A live consumer of one table's change stream.
///
/// Construction readies the stream in the background (unless `auto_ready`
/// is off); the first [`StreamConsumer::events`] call awaits readiness,
/// discovers the current shards, and starts the machinery. Every further
/// `events()` call is an independent subscriber that observes every record
/// delivered from that point on.
///
/// A producer that hits a non-retryable error terminates alone: the error
/// is logged, retained (see [`StreamConsumer::fault`]), and delivered once
/// to each current subscriber as an `Err` item, while the rest of the
/// shards keep flowing.
///
/// [`StreamConsumer::close`] (also triggered by dropping the consumer)
/// stops all polling and ends every subscriber's stream.
pub struct StreamConsumer {
    config: Arc<Config>,
    client: api::Client,
    ready: ReadyFuture,
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancel: CancellationToken,
    started: AtomicBool,
    subscribers: Mutex<Vec<mpsc::Sender<ConsumerItem>>>,
    fault: Mutex<Option<SharedError>>,
}

impl StreamConsumer {
    pub fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(SignedTransport::from_config(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build against a caller-provided transport. This is the seam tests
    /// use to substitute a scripted service.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let client = api::Client::new(transport);
        let ready: ReadyFuture =
            control::ready(client.clone(), config.table.clone(), config.stream_view_type)
                .map_err(SharedError::from)
                .boxed()
                .shared();

        if config.auto_ready {
            tokio::spawn(ready.clone().map(|_| ()));
        }

        Self {
            config: Arc::new(config),
            client,
            ready,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Wait for the stream to exist and the table to be active.
    ///
    /// One-shot: the control-plane work runs once, and every call observes
    /// the same outcome.
    pub async fn ready(&self) -> std::result::Result<Ready, SharedError> {
        self.ready.clone().await
    }

    /// Fetch a fresh snapshot of the table's stream specification.
    pub async fn stream_spec(&self) -> Result<StreamSpec> {
        control::describe_stream_spec(&self.client, &self.config.table).await
    }

    /// Subscribe to the merged record stream.
    ///
    /// The returned stream yields every [`ChangeEvent`] delivered after this
    /// call, independent of any other subscriber, and ends when the
    /// consumer is closed. Within a shard, events arrive in sequence-number
    /// order; across shards no order is defined.
    pub fn events(&self) -> impl Stream<Item = ConsumerItem> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if !self.inner.cancel.is_cancelled() {
            self.inner
                .subscribers
                .lock()
                .unwrap()
                .push(tx);
            self.ensure_started();
        }
        ReceiverStream::new(rx)
    }

    /// The first non-retryable producer failure, if any occurred.
    pub fn fault(&self) -> Option<SharedError> {
        self.inner.fault.lock().unwrap().clone()
    }

    /// Stop all polling and end every subscriber's stream. Idempotent.
    ///
    /// Producers observe the close at their next suspension point, so no
    /// call outlives one in-flight request plus one poll interval.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    fn ensure_started(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(
            MultiplexLoop {
                config: self.config.clone(),
                client: self.client.clone(),
                ready: self.ready.clone(),
                inner: self.inner.clone(),
            }
            .run(),
        );
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

/// The merge loop: consumes producer events, delivers records to
/// subscribers, and folds newly discovered shards in on every tick.
struct MultiplexLoop {
    config: Arc<Config>,
    client: api::Client,
    ready: ReadyFuture,
    inner: Arc<Inner>,
}

impl MultiplexLoop {
    async fn run(self) {
        let cancel = self.inner.cancel.clone();

        let ready = tokio::select! {
            _ = cancel.cancelled() => {
                self.shutdown();
                return;
            }
            ready = self.ready.clone() => ready,
        };
        if let Err(error) = ready {
            self.fail(error).await;
            return;
        }

        let (merge_tx, mut merge_rx) = mpsc::channel::<MergeEvent>(MERGE_BUFFER);
        let mut shard_set = ShardSet::default();

        match self.enumerate(&cancel).await {
            Ok(Some(observed)) => {
                let initial = shard_set.delta(observed);
                tracing::debug!(shards = initial.len(), "starting initial shard producers");
                for shard in initial {
                    self.spawn_producer(shard, self.config.shard_iterator_type, &merge_tx);
                }
            }
            Ok(None) => {
                self.shutdown();
                return;
            }
            Err(error) => {
                self.fail(error.into()).await;
                return;
            }
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.shard_update_period,
            self.config.shard_update_period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                event = merge_rx.recv() => match event {
                    Some(MergeEvent::Record(event)) => {
                        if !self.deliver(Ok(event), &cancel).await {
                            break;
                        }
                    }
                    Some(MergeEvent::ShardEnd { shard_id, expired }) => {
                        // An expired shard is forgotten so the next refresh
                        // re-discovers it and resumes from TRIM_HORIZON. A
                        // closed shard stays put and is never re-polled.
                        if expired {
                            shard_set.forget(&shard_id);
                        }
                    }
                    Some(MergeEvent::Fault { shard_id, error }) => {
                        tracing::error!(%shard_id, %error, "shard producer failed");
                        self.record_fault(&error);
                        if !self.deliver(Err(error), &cancel).await {
                            break;
                        }
                    }
                    // Unreachable while we hold merge_tx.
                    None => break,
                },

                _ = ticker.tick() => match self.enumerate(&cancel).await {
                    Ok(Some(observed)) => {
                        let new = shard_set.delta(observed);
                        if !new.is_empty() {
                            tracing::debug!(shards = new.len(), "discovered new shards");
                        }
                        for shard in new {
                            self.spawn_producer(shard, ShardIteratorType::TrimHorizon, &merge_tx);
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(%error, "shard refresh failed, retrying on next tick");
                    }
                },
            }
        }

        self.shutdown();
    }

    /// Enumerate the current shard snapshot, or `None` when closed while
    /// enumerating.
    async fn enumerate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ShardDescriptor>>> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            observed = paging::list_all_shards(
                &self.client,
                &self.config.table,
                self.config.list_streams_limit,
                self.config.get_shards_interval,
            ) => observed.map(Some),
        }
    }

    fn spawn_producer(
        &self,
        shard: ShardDescriptor,
        iterator_type: ShardIteratorType,
        merge_tx: &mpsc::Sender<MergeEvent>,
    ) {
        let client = self.client.clone();
        let config = self.config.clone();
        let cancel = self.inner.cancel.clone();
        let merge_tx = merge_tx.clone();

        tokio::spawn(async move {
            let ShardDescriptor {
                stream_arn,
                shard_id,
                ..
            } = shard;
            tracing::debug!(%shard_id, ?iterator_type, "shard producer starting");

            let records = paging::shard_records(
                client,
                stream_arn,
                shard_id.clone(),
                iterator_type,
                config.get_records_limit,
                config.get_records_interval,
            );
            let mut records = std::pin::pin!(records);

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = records.next() => next,
                };

                let event = match next {
                    Some(Ok(ShardItem::Record(record))) => match ChangeEvent::from_record(
                        &config.table,
                        &shard_id,
                        record,
                        config.json_mode,
                    ) {
                        Ok(event) => MergeEvent::Record(event),
                        Err(error) => MergeEvent::Fault {
                            shard_id: shard_id.clone(),
                            error: error.into(),
                        },
                    },
                    Some(Ok(ShardItem::Expired)) => MergeEvent::ShardEnd {
                        shard_id: shard_id.clone(),
                        expired: true,
                    },
                    Some(Err(error)) => MergeEvent::Fault {
                        shard_id: shard_id.clone(),
                        error: error.into(),
                    },
                    None => MergeEvent::ShardEnd {
                        shard_id: shard_id.clone(),
                        expired: false,
                    },
                };

                let terminal = !matches!(event, MergeEvent::Record(_));
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = merge_tx.send(event) => sent,
                };
                if terminal || sent.is_err() {
                    return;
                }
            }
        });
    }

    /// Send one item to every subscriber, pruning the ones that went away.
    /// Returns false when the consumer closed mid-delivery.
    async fn deliver(&self, item: ConsumerItem, cancel: &CancellationToken) -> bool {
        let senders: Vec<mpsc::Sender<ConsumerItem>> =
            self.inner.subscribers.lock().unwrap().clone();

        for sender in &senders {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                // A closed receiver surfaces as a send error; it's pruned below.
                _ = sender.send(item.clone()) => {}
            }
        }

        self.inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|sender| !sender.is_closed());
        true
    }

    fn record_fault(&self, error: &SharedError) {
        self.inner
            .fault
            .lock()
            .unwrap()
            .get_or_insert_with(|| error.clone());
    }

    /// Startup failed outright: retain the fault, tell current subscribers,
    /// and close.
    async fn fail(&self, error: SharedError) {
        tracing::error!(%error, "stream consumer failed to start");
        self.record_fault(&error);
        let cancel = self.inner.cancel.clone();
        self.deliver(Err(error), &cancel).await;
        self.shutdown();
    }

    fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.subscribers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        serde_json::from_value(serde_json::json!({
            "eventID": "e1",
            "eventName": "MODIFY",
            "awsRegion": "us-east-1",
            "dynamodb": {
                "Keys": {"id": {"S": "k1"}},
                "NewImage": {"id": {"S": "k1"}, "count": {"N": "3"}},
                "OldImage": {"id": {"S": "k1"}, "count": {"N": "2"}},
                "SequenceNumber": "100",
                "SizeBytes": 59,
                "StreamViewType": "NEW_AND_OLD_IMAGES"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_change_event_keeps_typed_form_by_default() {
        let event =
            ChangeEvent::from_record("orders", "shard-1", sample_record(), false).unwrap();

        assert_eq!(event.table, "orders");
        assert_eq!(event.shard_id, "shard-1");
        assert_eq!(event.event_name, Some(OperationType::Modify));
        assert_eq!(
            event.keys,
            Some(serde_json::json!({"id": {"S": "k1"}})),
        );
        assert_eq!(
            event.new_image,
            Some(serde_json::json!({"id": {"S": "k1"}, "count": {"N": "3"}})),
        );
    }

    #[test]
    fn test_change_event_translates_in_json_mode() {
        let event =
            ChangeEvent::from_record("orders", "shard-1", sample_record(), true).unwrap();

        assert_eq!(event.keys, Some(serde_json::json!({"id": "k1"})));
        assert_eq!(
            event.new_image,
            Some(serde_json::json!({"id": "k1", "count": 3})),
        );
        assert_eq!(
            event.old_image,
            Some(serde_json::json!({"id": "k1", "count": 2})),
        );
        assert_eq!(event.sequence_number.as_deref(), Some("100"));
    }

    #[test]
    fn test_change_event_without_payload() {
        let record: Record =
            serde_json::from_value(serde_json::json!({"eventID": "e9"})).unwrap();
        let event = ChangeEvent::from_record("orders", "shard-9", record, false).unwrap();
        assert_eq!(event.event_id, "e9");
        assert!(event.keys.is_none());
        assert!(event.new_image.is_none());
    }
}
