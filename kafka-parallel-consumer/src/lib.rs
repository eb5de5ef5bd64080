//! Bounded-parallel Kafka consumption with safe offset commits.
//!
//! Records are fetched one at a time, dispatched to a fixed pool of runners
//! and committed only once every earlier record of the same partition has been
//! handled. Records that share a lane (same partition, or same key, depending
//! on the [`ParallelismStrategy`]) are handled sequentially in fetch order.
//! Any failure tears the whole pipeline down and rebuilds it after a backoff,
//! resuming from the last committed offsets.
//!
//! ## Error logging (anyhow)
//!
//! Handler errors are `anyhow::Error`. When logging them, use formats that
//! include the full chain so root causes are visible in logs:
//!
//! - **Inline format:** `{e:#}`: full chain on one line (`outer: middle: root cause`).
//! - **Structured field:** `error = ?e`: full chain with `Caused by:` sections (Debug).
//!
//! Avoid `{}` / `%e` (Display) for errors; they only show the top-level message and hide the chain.

pub mod backoff;
pub mod client_proxy;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod metrics_consts;
pub mod offsets;
pub mod orchestrator;
pub mod parallelism;
pub mod pipeline;
pub mod supervisor;
pub mod test_utils;

pub use config::{AutoOffsetReset, ConsumerOptions, ParallelismStrategy, TuningOptions};
pub use consumer::ParallelConsumer;
pub use error::{BrokerError, ConsumerError, InvariantViolation};
pub use handler::RecordHandler;
pub use kafka::types::{Partition, Record, TopicPartitionOffset};
