//! Log consumer loop.
//!
//! One consumer owns one topic/group pair and feeds every record, in log
//! order, to an [`EventProcessor`]. Malformed records are skipped; a broken
//! log, cache or bus ends the loop so the process can be restarted.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::IngestError;
use crate::metrics;
use crate::services::ingest::EventProcessor;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("event log is not attached")]
    NotAttached,

    #[error("event log closed")]
    Closed,

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// One record as read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Source of records with consumer-group semantics.
#[async_trait]
pub trait EventLog: Send {
    /// Join the group and start fetching
    async fn attach(&mut self) -> Result<(), ConsumerError>;

    async fn next_record(&mut self) -> Result<Record, ConsumerError>;

    /// Leave the group. Safe to call when not attached.
    async fn detach(&mut self);
}

/// Kafka topic read through a `StreamConsumer`.
///
/// Offsets are auto-committed and a new group starts from the latest offset,
/// so events produced while nobody was consuming are not replayed.
pub struct KafkaLog {
    brokers: String,
    topic: String,
    group_id: String,
    consumer: Option<StreamConsumer>,
}

impl KafkaLog {
    pub fn new(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            consumer: None,
        }
    }
}

#[async_trait]
impl EventLog for KafkaLog {
    async fn attach(&mut self) -> Result<(), ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "45000")
            .create()?;

        consumer.subscribe(&[&self.topic])?;
        info!(topic = %self.topic, group = %self.group_id, "Kafka consumer attached");

        self.consumer = Some(consumer);
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Record, ConsumerError> {
        let consumer = self.consumer.as_ref().ok_or(ConsumerError::NotAttached)?;
        let message = consumer.recv().await?;

        Ok(Record {
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    async fn detach(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(topic = %self.topic, group = %self.group_id, "Kafka consumer detached");
        }
    }
}

pub struct IngestionConsumer<L, P> {
    log: L,
    processor: P,
}

impl<L, P> IngestionConsumer<L, P>
where
    L: EventLog,
    P: EventProcessor,
{
    pub fn new(log: L, processor: P) -> Self {
        Self { log, processor }
    }

    pub async fn start(&mut self) -> Result<(), ConsumerError> {
        self.log.attach().await
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The shutdown signal is only observed between records, so a record
    /// that has been fetched is always processed to completion.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let name = self.processor.name().to_string();
        info!(consumer = %name, "Ingestion consumer running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let record = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                record = self.log.next_record() => record,
            };

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    error!(consumer = %name, error = %e, "Event log failed");
                    return Err(e);
                }
            };

            match self.processor.process(&record.payload).await {
                Ok(report) => {
                    let outcome = if report.skipped { "skipped" } else { "processed" };
                    metrics::record_event(&name, outcome);
                    debug!(
                        consumer = %name,
                        partition = record.partition,
                        offset = record.offset,
                        published = report.published,
                        pushed = report.pushed,
                        "Record processed"
                    );
                }
                Err(e) if e.is_fatal() => {
                    metrics::record_event(&name, "failed");
                    error!(
                        consumer = %name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Record processing hit a transport failure"
                    );
                    return Err(e.into());
                }
                Err(e) => {
                    metrics::record_event(&name, "malformed");
                    warn!(
                        consumer = %name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping malformed record"
                    );
                }
            }
        }

        info!(consumer = %name, "Ingestion consumer stopping");
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.log.detach().await;
    }
}
