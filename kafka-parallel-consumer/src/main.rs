use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kafka_parallel_consumer::config::Config;
use kafka_parallel_consumer::consumer::kafka_config;
use kafka_parallel_consumer::kafka::KafkaClientFactory;
use kafka_parallel_consumer::{ParallelConsumer, Record};

async fn log_record(record: Record, _cancel: CancellationToken) -> Result<()> {
    info!(
        topic = record.topic(),
        partition = record.partition_number(),
        offset = record.offset(),
        bytes = record.value().map_or(0, <[u8]>::len),
        "Handled record"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kafka_parallel_consumer=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kafka parallel consumer");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    info!("Configuration loaded: {:?}", config);

    let metrics_addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid metrics bind address {}", config.bind_address()))?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Metrics server listening on {}", metrics_addr);

    let options = config.consumer_options();
    let client_config = kafka_config(&options).with_tls(config.kafka_tls).build();
    let consumer = ParallelConsumer::with_client_factory(
        options,
        log_record,
        Arc::new(KafkaClientFactory::new(client_config)),
    )
    .context("Invalid consumer configuration")?
    .with_tuning(config.tuning_options());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {e:#}"),
        }
        shutdown.cancel();
    });

    consumer.run(cancel).await?;

    info!("Kafka parallel consumer stopped");
    Ok(())
}
