pub mod client;
pub mod config;
pub mod types;

pub use client::{BrokerClient, BrokerClientFactory, KafkaBrokerClient, KafkaClientFactory};
pub use config::ConsumerConfigBuilder;
pub use types::{Partition, Record, TopicPartitionOffset};
