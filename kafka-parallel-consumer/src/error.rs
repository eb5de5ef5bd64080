use thiserror::Error;

use crate::kafka::types::{Partition, TopicPartitionOffset};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid consumer options:\n{}", .0.join("\n"))]
    InvalidOptions(Vec<String>),

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("handler failed for {position}: {source:#}")]
    Handler {
        position: TopicPartitionOffset,
        source: anyhow::Error,
    },

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("consumer task panicked: {0}")]
    TaskPanicked(String),

    #[error("internal channel to {0} closed")]
    ChannelClosed(&'static str),

    #[error("consumer task stopped without being cancelled")]
    UnexpectedStop,

    #[error("giving up after {restarts} consecutive restarts: {source}")]
    RestartsExhausted {
        restarts: u32,
        source: Box<ConsumerError>,
    },
}

/// Bookkeeping errors. Any of these means in-flight state can no longer be
/// trusted and the whole consumer pipeline has to be rebuilt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("got out of order or duplicated offset {offset} on {partition}, expected {expected}")]
    OutOfOrderOffset {
        partition: Partition,
        offset: i64,
        expected: i64,
    },

    #[error("offset {0} is not tracked")]
    OffsetNotTracked(TopicPartitionOffset),

    #[error("no free runner available, {running} of {max} lanes running")]
    CapacityExceeded { running: usize, max: usize },

    #[error("received a record without having asked for one")]
    UnsolicitedRecord,

    #[error("enqueueing behind an existing lane is not supported by the {0} strategy")]
    EnqueueNotSupported(&'static str),

    #[error("no lane registered for ticket {0}")]
    UnknownLane(String),

    #[error("lane already registered for ticket {0}")]
    LaneAlreadyRegistered(String),

    #[error("runner {0} does not exist")]
    UnknownRunner(usize),
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker client unavailable: {0}")]
    Unavailable(String),
}
