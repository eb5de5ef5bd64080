use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::kafka::types::{Partition, TopicPartitionOffset};

pub const DEFAULT_COMMIT_THRESHOLD: usize = 50;
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Positions waiting to be committed, at most one per partition.
///
/// Stored positions are `offset + 1`, the next offset the group should read.
#[derive(Debug)]
pub struct CommitQueue {
    pending: HashMap<Partition, i64>,
    enqueued_since_commit: usize,
    threshold: usize,
    timeout: Duration,
    last_commit: Option<Instant>,
}

impl Default for CommitQueue {
    fn default() -> Self {
        Self::new(DEFAULT_COMMIT_THRESHOLD, DEFAULT_COMMIT_TIMEOUT)
    }
}

impl CommitQueue {
    pub fn new(threshold: usize, timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            enqueued_since_commit: 0,
            threshold,
            timeout,
            last_commit: None,
        }
    }

    pub fn enqueue(&mut self, completed: &TopicPartitionOffset) {
        let next = completed.offset() + 1;
        self.pending
            .entry(completed.partition().clone())
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
        self.enqueued_since_commit += 1;
    }

    /// Drains the queue, returning one commit position per partition, and
    /// restarts the commit timeout.
    pub fn pop_to_commit(&mut self) -> Vec<TopicPartitionOffset> {
        let mut positions: Vec<_> = self
            .pending
            .drain()
            .map(|(partition, offset)| TopicPartitionOffset::new(partition, offset))
            .collect();
        positions.sort();

        self.enqueued_since_commit = 0;
        self.last_commit = Some(Instant::now());
        positions
    }

    pub fn is_above_threshold(&self) -> bool {
        self.enqueued_since_commit > self.threshold
    }

    /// True until the first commit, then once `timeout` elapsed since the last one.
    pub fn is_timeout_exceeded(&self) -> bool {
        match self.last_commit {
            Some(last) => last.elapsed() > self.timeout,
            None => true,
        }
    }

    pub fn is_commit_due(&self) -> bool {
        !self.is_empty() && (self.is_above_threshold() || self.is_timeout_exceeded())
    }

    /// Number of partitions with a pending position.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(partition: i32, offset: i64) -> TopicPartitionOffset {
        TopicPartitionOffset::new(Partition::new("test-topic".to_string(), partition), offset)
    }

    #[test]
    fn test_keeps_most_advanced_position_per_partition() {
        let mut queue = CommitQueue::default();

        queue.enqueue(&at(0, 5));
        queue.enqueue(&at(0, 9));
        queue.enqueue(&at(0, 7));
        queue.enqueue(&at(1, 2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_to_commit(), vec![at(0, 10), at(1, 3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_threshold_counts_enqueues_not_partitions() {
        let mut queue = CommitQueue::new(3, Duration::from_secs(60));

        for offset in 0..3 {
            queue.enqueue(&at(0, offset));
        }
        assert!(!queue.is_above_threshold());

        queue.enqueue(&at(0, 3));
        assert!(queue.is_above_threshold());

        queue.pop_to_commit();
        assert!(!queue.is_above_threshold());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exceeded_before_first_commit_and_after_interval() {
        let mut queue = CommitQueue::new(50, Duration::from_secs(5));
        assert!(queue.is_timeout_exceeded());

        queue.enqueue(&at(0, 1));
        queue.pop_to_commit();
        assert!(!queue.is_timeout_exceeded());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!queue.is_timeout_exceeded());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(queue.is_timeout_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_due() {
        let mut queue = CommitQueue::new(2, Duration::from_secs(5));
        assert!(!queue.is_commit_due());

        queue.enqueue(&at(0, 0));
        assert!(queue.is_commit_due());
        queue.pop_to_commit();

        queue.enqueue(&at(0, 1));
        assert!(!queue.is_commit_due());
        queue.enqueue(&at(0, 2));
        queue.enqueue(&at(0, 3));
        assert!(queue.is_commit_due());
    }
}
