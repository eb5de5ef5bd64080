use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConsumerOptions, TuningOptions};
use crate::error::ConsumerError;
use crate::handler::RecordHandler;
use crate::kafka::client::{BrokerClientFactory, KafkaClientFactory};
use crate::kafka::config::ConsumerConfigBuilder;
use crate::pipeline::Pipeline;
use crate::supervisor::Supervisor;

/// Consumes records from the configured topics and hands them to a
/// [`RecordHandler`] with bounded parallelism, committing only offsets whose
/// records and all their predecessors in the partition were handled.
pub struct ParallelConsumer<H> {
    options: ConsumerOptions,
    tuning: TuningOptions,
    factory: Arc<dyn BrokerClientFactory>,
    handler: Arc<H>,
}

impl<H: RecordHandler> ParallelConsumer<H> {
    /// Creates a consumer backed by Kafka. Options are validated eagerly.
    pub fn new(options: ConsumerOptions, handler: H) -> Result<Self, ConsumerError> {
        let config = kafka_config(&options).build();
        Self::with_client_factory(options, handler, Arc::new(KafkaClientFactory::new(config)))
    }

    pub fn with_client_factory(
        options: ConsumerOptions,
        handler: H,
        factory: Arc<dyn BrokerClientFactory>,
    ) -> Result<Self, ConsumerError> {
        options.validate()?;
        Ok(Self {
            options,
            tuning: TuningOptions::default(),
            factory,
            handler: Arc::new(handler),
        })
    }

    pub fn with_tuning(mut self, tuning: TuningOptions) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Runs until `cancel` is cancelled, restarting the pipeline after any
    /// failure. Only returns an error when a restart limit is configured and
    /// has been exhausted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        info!(
            consumer = %self.options.consumer_name(),
            topics = ?self.options.topics,
            group_id = %self.options.group_id,
            "Starting parallel consumer"
        );

        let supervisor = Supervisor::new(self.tuning.restart_backoff, self.tuning.max_restarts);
        supervisor
            .run(&cancel, |incarnation| {
                Pipeline::spawn(
                    &self.options,
                    &self.tuning,
                    self.factory.clone(),
                    self.handler.clone(),
                    incarnation,
                )
                .wait()
            })
            .await
    }
}

/// Kafka client settings derived from the options. Extra settings such as TLS
/// can be layered on before building a [`KafkaClientFactory`].
pub fn kafka_config(options: &ConsumerOptions) -> ConsumerConfigBuilder {
    ConsumerConfigBuilder::new(&options.bootstrap_servers, &options.group_id)
        .with_offset_reset(options.auto_offset_reset.as_str())
        .with_client_id(&options.consumer_name())
}
