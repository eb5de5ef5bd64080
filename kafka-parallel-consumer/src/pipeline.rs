//! One incarnation of the consumer pipeline: client proxy, orchestrator,
//! offset controller, coordinator and runners, all sharing one cancellation
//! token. A failure of any task stops all of them and the incarnation is
//! thrown away as a whole.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client_proxy::{ClientProxy, ProxySettings};
use crate::config::{ConsumerOptions, TuningOptions};
use crate::error::ConsumerError;
use crate::handler::RecordHandler;
use crate::kafka::client::BrokerClientFactory;
use crate::metrics_consts::SUBTREE_STARTS;
use crate::offsets::OffsetController;
use crate::orchestrator::Orchestrator;
use crate::parallelism::{for_strategy, Coordinator, Runner};

pub struct Pipeline {
    name: String,
    tasks: JoinSet<Result<(), ConsumerError>>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl Pipeline {
    pub fn spawn<H: RecordHandler>(
        options: &ConsumerOptions,
        tuning: &TuningOptions,
        factory: Arc<dyn BrokerClientFactory>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Self {
        let name = options.consumer_name();
        let mut tasks = JoinSet::new();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (offset_tx, offset_rx) = mpsc::unbounded_channel();
        let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();

        let settings = ProxySettings {
            topics: options.topics.clone(),
            poll_timeout: tuning.poll_timeout,
            commit_interval: tuning.commit_interval,
            commit_threshold: tuning.commit_threshold,
            commit_timeout: tuning.commit_timeout,
        };
        let (proxy, proxy_handle) =
            ClientProxy::new(factory, settings, event_tx.clone(), cancel.clone());

        let mut runner_txs = Vec::with_capacity(options.max_degree_of_parallelism);
        for id in 0..options.max_degree_of_parallelism {
            let (runner, tx) =
                Runner::new(id, handler.clone(), coordinator_tx.clone(), cancel.clone());
            runner_txs.push(tx);
            tasks.spawn(runner.run());
        }

        let coordinator = Coordinator::new(
            for_strategy(options.parallelism_strategy),
            runner_txs,
            coordinator_rx,
            event_tx.clone(),
            cancel.clone(),
        );
        let offsets = OffsetController::new(offset_rx, event_tx, cancel.clone());
        let orchestrator = Orchestrator::new(
            event_rx,
            offset_tx,
            coordinator_tx,
            proxy_handle,
            cancel.clone(),
        );

        tasks.spawn(proxy.run());
        tasks.spawn(orchestrator.run());
        tasks.spawn(offsets.run());
        tasks.spawn(coordinator.run());

        metrics::counter!(SUBTREE_STARTS).increment(1);
        info!(
            consumer = %name,
            max_parallelism = options.max_degree_of_parallelism,
            strategy = %options.parallelism_strategy,
            "Consumer pipeline started"
        );

        Self {
            name,
            tasks,
            cancel,
            shutdown_timeout: tuning.shutdown_timeout,
        }
    }

    /// Runs until the pipeline is cancelled or one of its tasks stops.
    ///
    /// Returns `Ok` only for a cancellation from outside. Any task stopping on
    /// its own, with or without an error, fails the pipeline.
    pub async fn wait(mut self) -> Result<(), ConsumerError> {
        let first_exit = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => None,
            joined = self.tasks.join_next() => joined,
        };

        let outcome = match first_exit {
            None => Ok(()),
            Some(joined) => match flatten(joined) {
                Ok(()) => Err(ConsumerError::UnexpectedStop),
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &outcome {
            error!(consumer = %self.name, error = ?e, "Consumer pipeline failed");
        }

        self.cancel.cancel();
        self.stop().await;
        outcome
    }

    async fn stop(&mut self) {
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = flatten(joined) {
                    debug!(consumer = %self.name, error = ?e, "Task failed while stopping");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                consumer = %self.name,
                remaining = self.tasks.len(),
                "Pipeline did not stop in time, aborting remaining tasks"
            );
            self.tasks.shutdown().await;
        }
        info!(consumer = %self.name, "Consumer pipeline stopped");
    }
}

fn flatten(joined: Result<Result<(), ConsumerError>, JoinError>) -> Result<(), ConsumerError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ConsumerError::TaskPanicked(e.to_string())),
    }
}
