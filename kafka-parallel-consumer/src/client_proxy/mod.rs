//! Client Proxy - the only task that talks to the broker
//!
//! Commits always win over fetches: commit requests, the scheduled commit tick
//! and fetch requests are polled in that order, and a fetch never blocks for
//! longer than the poll timeout before the loop gets to look at commits again.

pub mod commit_queue;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConsumerError;
use crate::kafka::client::{BrokerClient, BrokerClientFactory};
use crate::kafka::types::TopicPartitionOffset;
use crate::metrics_consts::{
    COMMITS, COMMIT_FAILURES, EMPTY_POLLS, PARTITION_LAST_COMMITTED_OFFSET, RECORDS_FETCHED,
};
use crate::orchestrator::OrchestratorEvent;

pub use commit_queue::CommitQueue;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub topics: Vec<String>,
    pub poll_timeout: Duration,
    pub commit_interval: Duration,
    pub commit_threshold: usize,
    pub commit_timeout: Duration,
}

/// Sending side of the proxy's two inboxes.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    commits: UnboundedSender<TopicPartitionOffset>,
    fetches: UnboundedSender<()>,
}

impl ProxyHandle {
    pub fn fetch(&self) -> Result<(), ConsumerError> {
        self.fetches
            .send(())
            .map_err(|_| ConsumerError::ChannelClosed("client proxy"))
    }

    /// Queues a handled position for commit.
    pub fn commit(&self, completed: TopicPartitionOffset) -> Result<(), ConsumerError> {
        self.commits
            .send(completed)
            .map_err(|_| ConsumerError::ChannelClosed("client proxy"))
    }
}

pub struct ClientProxy {
    factory: Arc<dyn BrokerClientFactory>,
    settings: ProxySettings,
    queue: CommitQueue,
    commits: UnboundedReceiver<TopicPartitionOffset>,
    fetches: UnboundedReceiver<()>,
    refetch: UnboundedSender<()>,
    events: UnboundedSender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl ClientProxy {
    pub fn new(
        factory: Arc<dyn BrokerClientFactory>,
        settings: ProxySettings,
        events: UnboundedSender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> (Self, ProxyHandle) {
        let (commit_tx, commits) = mpsc::unbounded_channel();
        let (fetch_tx, fetches) = mpsc::unbounded_channel();
        let queue = CommitQueue::new(settings.commit_threshold, settings.commit_timeout);

        let proxy = Self {
            factory,
            settings,
            queue,
            commits,
            fetches,
            refetch: fetch_tx.clone(),
            events,
            cancel,
        };
        let handle = ProxyHandle {
            commits: commit_tx,
            fetches: fetch_tx,
        };
        (proxy, handle)
    }

    pub async fn run(mut self) -> Result<(), ConsumerError> {
        let mut client = self.factory.create()?;

        let result = match client.subscribe(&self.settings.topics).await {
            Ok(()) => self.process(client.as_mut()).await,
            Err(e) => Err(e.into()),
        };

        self.shutdown(client.as_mut()).await;
        result
    }

    async fn process(&mut self, client: &mut dyn BrokerClient) -> Result<(), ConsumerError> {
        let period = self.settings.commit_interval;
        let mut scheduled_commit = interval_at(Instant::now() + period, period);
        scheduled_commit.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                Some(completed) = self.commits.recv() => {
                    self.queue.enqueue(&completed);
                    self.commit_if_due(client, "threshold").await?;
                }

                _ = scheduled_commit.tick() => {
                    self.commit_if_due(client, "scheduled").await?;
                }

                Some(()) = self.fetches.recv() => {
                    self.fetch(client).await?;
                }
            }
        }
    }

    async fn fetch(&mut self, client: &mut dyn BrokerClient) -> Result<(), ConsumerError> {
        let polled = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return Ok(()),
            polled = client.fetch(self.settings.poll_timeout) => polled?,
        };

        match polled {
            Some(record) => {
                metrics::counter!(RECORDS_FETCHED).increment(1);
                self.events
                    .send(OrchestratorEvent::InboundRecord(record))
                    .map_err(|_| ConsumerError::ChannelClosed("orchestrator"))
            }
            None => {
                metrics::counter!(EMPTY_POLLS).increment(1);
                self.refetch
                    .send(())
                    .map_err(|_| ConsumerError::ChannelClosed("client proxy"))
            }
        }
    }

    async fn commit_if_due(
        &mut self,
        client: &mut dyn BrokerClient,
        trigger: &'static str,
    ) -> Result<(), ConsumerError> {
        if !self.queue.is_commit_due() {
            return Ok(());
        }

        let positions = self.queue.pop_to_commit();
        metrics::counter!(COMMITS, &[("trigger", trigger)]).increment(1);
        if let Err(e) = client.commit(&positions).await {
            metrics::counter!(COMMIT_FAILURES, &[("phase", "running")]).increment(1);
            return Err(e.into());
        }

        record_committed(&positions);
        debug!(partitions = positions.len(), trigger, "Committed offsets");
        Ok(())
    }

    /// Final best effort commit of whatever is queued, then release the client.
    async fn shutdown(&mut self, client: &mut dyn BrokerClient) {
        while let Ok(completed) = self.commits.try_recv() {
            self.queue.enqueue(&completed);
        }

        if !self.queue.is_empty() {
            let positions = self.queue.pop_to_commit();
            metrics::counter!(COMMITS, &[("trigger", "shutdown")]).increment(1);
            match client.commit(&positions).await {
                Ok(()) => {
                    record_committed(&positions);
                    info!(partitions = positions.len(), "Committed offsets on shutdown");
                }
                Err(e) => {
                    metrics::counter!(COMMIT_FAILURES, &[("phase", "shutdown")]).increment(1);
                    warn!(error = ?e, "Failed to commit offsets on shutdown");
                }
            }
        }

        if let Err(e) = client.unsubscribe().await {
            debug!(error = ?e, "Failed to unsubscribe on shutdown");
        }
        if let Err(e) = client.close().await {
            debug!(error = ?e, "Failed to close broker client on shutdown");
        }
        info!("Client proxy stopped");
    }
}

fn record_committed(positions: &[TopicPartitionOffset]) {
    for position in positions {
        metrics::gauge!(
            PARTITION_LAST_COMMITTED_OFFSET,
            "topic" => position.topic().to_string(),
            "partition" => position.partition_number().to_string()
        )
        .set(position.offset() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::Partition;
    use crate::test_utils::InMemoryBroker;

    fn settings(topic: &str) -> ProxySettings {
        ProxySettings {
            topics: vec![topic.to_string()],
            poll_timeout: Duration::from_millis(10),
            commit_interval: Duration::from_secs(5),
            commit_threshold: 50,
            commit_timeout: Duration::from_secs(5),
        }
    }

    fn at(offset: i64) -> TopicPartitionOffset {
        TopicPartitionOffset::new(Partition::new("orders".to_string(), 0), offset)
    }

    #[tokio::test]
    async fn test_fetch_retries_until_a_record_arrives() {
        let broker = InMemoryBroker::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (proxy, handle) =
            ClientProxy::new(Arc::new(broker.clone()), settings("orders"), event_tx, cancel.clone());
        let task = tokio::spawn(proxy.run());

        handle.fetch().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.produce("orders", 0, Some("k"), "hello");

        match event_rx.recv().await.unwrap() {
            OrchestratorEvent::InboundRecord(record) => {
                assert_eq!(record.offset(), 0);
                assert_eq!(record.value_as_str(), Some("hello"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(broker.empty_polls() > 0);
    }

    #[tokio::test]
    async fn test_first_commit_goes_through_immediately() {
        let broker = InMemoryBroker::new();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (proxy, handle) =
            ClientProxy::new(Arc::new(broker.clone()), settings("orders"), event_tx, cancel.clone());
        let task = tokio::spawn(proxy.run());

        handle.commit(at(4)).unwrap();
        handle.commit(at(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the second position waits for the threshold or the timeout
        assert_eq!(broker.commit_history(), vec![vec![at(5)]]);

        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(broker.commit_history(), vec![vec![at(5)], vec![at(6)]]);
        assert_eq!(broker.committed(at(0).partition()), Some(6));
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_commit_failure_outside_shutdown_escalates() {
        let broker = InMemoryBroker::new();
        broker.fail_commits(true);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (proxy, handle) = ClientProxy::new(
            Arc::new(broker.clone()),
            settings("orders"),
            event_tx,
            CancellationToken::new(),
        );
        let task = tokio::spawn(proxy.run());

        handle.commit(at(0)).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ConsumerError::Broker(_)));
        assert!(broker.is_closed());
    }
}
