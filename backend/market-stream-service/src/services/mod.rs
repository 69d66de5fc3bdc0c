pub mod consumer;
pub mod dispatcher;
pub mod ingest;

pub use consumer::{ConsumerError, EventLog, IngestionConsumer, KafkaLog, Record};
pub use dispatcher::{DisabledPushSink, NotificationDispatcher, PushError, PushSink};
pub use ingest::{EventProcessor, EventRouter, ProcessReport};
