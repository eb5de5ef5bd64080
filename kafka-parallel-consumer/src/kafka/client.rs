use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::BrokerError;
use crate::kafka::types::{Record, TopicPartitionOffset};
use crate::metrics_consts::BROKER_ERRORS;

/// The broker operations the consumer pipeline needs. Exactly one task owns a
/// client at a time, so methods take `&mut self`.
#[async_trait]
pub trait BrokerClient: Send {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Waits up to `timeout` for the next record. Transient broker errors are
    /// reported as an empty poll; only fatal ones are returned.
    async fn fetch(&mut self, timeout: Duration) -> Result<Option<Record>, BrokerError>;

    /// Commits positions (the next offset to read) for each given partition.
    async fn commit(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError>;

    async fn unsubscribe(&mut self) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Creates a fresh client for every pipeline incarnation.
pub trait BrokerClientFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Box<dyn BrokerClient>, BrokerError>;
}

pub struct LoggingConsumerContext;

impl ClientContext for LoggingConsumerContext {}

impl ConsumerContext for LoggingConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        info!("Pre-rebalance event: {:?}", rebalance);
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        info!("Post-rebalance event: {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = ?e, "Offset commit callback reported failure"),
        }
    }
}

pub struct KafkaClientFactory {
    config: ClientConfig,
}

impl KafkaClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl BrokerClientFactory for KafkaClientFactory {
    fn create(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
        let consumer: StreamConsumer<LoggingConsumerContext> =
            self.config.create_with_context(LoggingConsumerContext)?;
        Ok(Box::new(KafkaBrokerClient {
            consumer: Some(consumer),
            consecutive_errors: 0,
        }))
    }
}

pub struct KafkaBrokerClient {
    consumer: Option<StreamConsumer<LoggingConsumerContext>>,
    consecutive_errors: u64,
}

impl KafkaBrokerClient {
    fn consumer(&self) -> Result<&StreamConsumer<LoggingConsumerContext>, BrokerError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| BrokerError::Unavailable("consumer already closed".to_string()))
    }

    /// Returns the error back when it should stop the pipeline, after logging
    /// and backing off briefly for transient ones.
    async fn handle_kafka_error(e: KafkaError, current_count: u64) -> Option<KafkaError> {
        match &e {
            KafkaError::MessageConsumption(code) => {
                match code {
                    RDKafkaErrorCode::PartitionEOF => {
                        metrics::counter!(BROKER_ERRORS, &[("error", "partition_eof")])
                            .increment(1);
                    }
                    RDKafkaErrorCode::OffsetOutOfRange => {
                        // auto.offset.reset repositions the partition with the broker
                        warn!("Offset out of range - seeking to configured offset reset policy");
                        metrics::counter!(BROKER_ERRORS, &[("error", "offset_out_of_range")])
                            .increment(1);
                        sleep(Duration::from_millis(500)).await;
                    }
                    _ => {
                        warn!("Kafka consumer error: {code:?}");
                        metrics::counter!(BROKER_ERRORS, &[("error", "consumer")]).increment(1);
                        sleep(Duration::from_millis(100 * current_count.min(10))).await;
                    }
                }
                None
            }

            KafkaError::MessageConsumptionFatal(code) => {
                error!("Fatal Kafka consumer error: {code:?}");
                Some(e)
            }

            KafkaError::Global(RDKafkaErrorCode::Authentication) => {
                error!("Kafka authentication failed");
                Some(e)
            }

            KafkaError::Global(code) => {
                warn!("Global Kafka error: {code:?} - waiting for reconnect");
                metrics::counter!(BROKER_ERRORS, &[("error", "global")]).increment(1);
                sleep(Duration::from_millis(500 * current_count.min(6))).await;
                None
            }

            KafkaError::Canceled => {
                info!("Kafka consumer canceled");
                Some(e)
            }

            _ => {
                warn!("Unexpected Kafka error: {e:?}");
                metrics::counter!(BROKER_ERRORS, &[("error", "unexpected")]).increment(1);
                sleep(Duration::from_millis(100 * current_count.min(10))).await;
                None
            }
        }
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer()?.subscribe(&topics)?;
        info!(topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    async fn fetch(&mut self, timeout: Duration) -> Result<Option<Record>, BrokerError> {
        let polled = {
            let consumer = self.consumer()?;
            match tokio::time::timeout(timeout, consumer.recv()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(message)) => Ok(Record::from(&message)),
                Ok(Err(e)) => Err(e),
            }
        };

        match polled {
            Ok(record) => {
                self.consecutive_errors = 0;
                Ok(Some(record))
            }
            Err(e) => {
                self.consecutive_errors += 1;
                match Self::handle_kafka_error(e, self.consecutive_errors).await {
                    Some(fatal) => Err(fatal.into()),
                    None => Ok(None),
                }
            }
        }
    }

    async fn commit(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError> {
        let mut list = TopicPartitionList::new();
        for position in positions {
            list.add_partition_offset(
                position.topic(),
                position.partition_number(),
                Offset::Offset(position.offset()),
            )?;
        }

        self.consumer()?.commit(&list, CommitMode::Sync)?;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.consumer()?.unsubscribe();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.consumer.take().is_some() {
            info!("Kafka consumer closed");
        }
        Ok(())
    }
}
