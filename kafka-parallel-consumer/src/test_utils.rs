//! In-memory broker for tests. Behaves like a single consumer group member
//! that owns every partition: fetching resumes from the committed position of
//! each partition whenever a new client subscribes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::kafka::client::{BrokerClient, BrokerClientFactory};
use crate::kafka::types::{Partition, Record, TopicPartitionOffset};

#[derive(Default)]
struct BrokerState {
    logs: BTreeMap<Partition, Vec<Record>>,
    committed: HashMap<Partition, i64>,
    commit_history: Vec<Vec<TopicPartitionOffset>>,
    clients_created: usize,
    open_clients: usize,
    empty_polls: usize,
    fail_commits: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record and returns its offset.
    pub fn produce(&self, topic: &str, partition: i32, key: Option<&str>, value: &str) -> i64 {
        let mut state = self.state();
        let log = state
            .logs
            .entry(Partition::new(topic.to_string(), partition))
            .or_default();
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
        log.push(Record::new(
            topic,
            partition,
            offset,
            key.map(|k| k.as_bytes().to_vec()),
            Some(value.as_bytes().to_vec()),
        ));
        offset
    }

    /// Next offset the group will read from the partition, if it committed.
    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.state().committed.get(partition).copied()
    }

    pub fn commit_history(&self) -> Vec<Vec<TopicPartitionOffset>> {
        self.state().commit_history.clone()
    }

    pub fn clients_created(&self) -> usize {
        self.state().clients_created
    }

    /// True once every client created so far has been closed.
    pub fn is_closed(&self) -> bool {
        let state = self.state();
        state.clients_created > 0 && state.open_clients == 0
    }

    pub fn empty_polls(&self) -> usize {
        self.state().empty_polls
    }

    pub fn fail_commits(&self, fail: bool) {
        self.state().fail_commits = fail;
    }
}

impl BrokerClientFactory for InMemoryBroker {
    fn create(&self) -> Result<Box<dyn BrokerClient>, BrokerError> {
        let mut state = self.state();
        state.clients_created += 1;
        state.open_clients += 1;
        Ok(Box::new(InMemoryBrokerClient {
            broker: self.clone(),
            topics: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }))
    }
}

pub struct InMemoryBrokerClient {
    broker: InMemoryBroker,
    topics: Vec<String>,
    positions: HashMap<Partition, i64>,
    // Round robin over partitions so none of them starves.
    cursor: usize,
    closed: bool,
}

impl InMemoryBrokerClient {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Unavailable("client closed".to_string()));
        }
        Ok(())
    }

    fn next_record(&mut self) -> Option<Record> {
        let state = self.broker.state();
        let partitions: Vec<&Partition> = state
            .logs
            .keys()
            .filter(|p| self.topics.iter().any(|t| t == p.topic()))
            .collect();
        if partitions.is_empty() {
            return None;
        }

        for step in 0..partitions.len() {
            let partition = partitions[(self.cursor + step) % partitions.len()];
            let position = *self
                .positions
                .entry(partition.clone())
                .or_insert_with(|| state.committed.get(partition).copied().unwrap_or(0));
            let found = usize::try_from(position)
                .ok()
                .and_then(|index| state.logs.get(partition)?.get(index).cloned());
            if let Some(record) = found {
                self.positions.insert(partition.clone(), position + 1);
                self.cursor = (self.cursor + step + 1) % partitions.len();
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl BrokerClient for InMemoryBrokerClient {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.topics = topics.to_vec();
        self.positions.clear();
        Ok(())
    }

    async fn fetch(&mut self, timeout: Duration) -> Result<Option<Record>, BrokerError> {
        self.ensure_open()?;
        if let Some(record) = self.next_record() {
            return Ok(Some(record));
        }

        self.broker.state().empty_polls += 1;
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn commit(&mut self, positions: &[TopicPartitionOffset]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        if state.fail_commits {
            return Err(BrokerError::Unavailable("commit rejected".to_string()));
        }
        for position in positions {
            state
                .committed
                .insert(position.partition().clone(), position.offset());
        }
        state.commit_history.push(positions.to_vec());
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.topics.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.closed {
            self.closed = true;
            self.broker.state().open_clients -= 1;
        }
        Ok(())
    }
}
