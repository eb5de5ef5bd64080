use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::error::InvariantViolation;
use crate::kafka::types::{Partition, TopicPartitionOffset};

#[derive(Debug, Clone, Copy)]
struct TrackedOffset {
    offset: i64,
    completed: bool,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: VecDeque<TrackedOffset>,
}

/// Tracks in-flight offsets per partition and computes how far each partition
/// can safely be committed, given that records complete out of order.
///
/// While a partition has offsets in flight, new offsets must follow them
/// contiguously. A partition with nothing in flight accepts any offset, so
/// gaps left by compaction or transaction markers are skipped. A completion
/// releases the longest completed prefix, and the last released
/// offset becomes the partition's new commit watermark.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<Partition, PartitionOffsets>,
    total_tracked: usize,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, position: &TopicPartitionOffset) -> Result<(), InvariantViolation> {
        let entry = self
            .partitions
            .entry(position.partition().clone())
            .or_default();

        if let Some(last) = entry.in_flight.back().map(|t| t.offset) {
            if last + 1 != position.offset() {
                return Err(InvariantViolation::OutOfOrderOffset {
                    partition: position.partition().clone(),
                    offset: position.offset(),
                    expected: last + 1,
                });
            }
        }

        entry.in_flight.push_back(TrackedOffset {
            offset: position.offset(),
            completed: false,
        });
        self.total_tracked += 1;

        Ok(())
    }

    /// Marks an offset as completed. Returns the new commit watermark when the
    /// completion released a prefix of the partition's in-flight offsets.
    pub fn complete(
        &mut self,
        position: &TopicPartitionOffset,
    ) -> Result<Option<TopicPartitionOffset>, InvariantViolation> {
        let not_tracked = || InvariantViolation::OffsetNotTracked(position.clone());

        let entry = self
            .partitions
            .get_mut(position.partition())
            .ok_or_else(not_tracked)?;

        let first = entry.in_flight.front().ok_or_else(not_tracked)?.offset;
        let index = position
            .offset()
            .checked_sub(first)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(not_tracked)?;
        let tracked = entry.in_flight.get_mut(index).ok_or_else(not_tracked)?;
        tracked.completed = true;

        let mut watermark = None;
        while let Some(front) = entry.in_flight.front() {
            if !front.completed {
                break;
            }
            watermark = Some(front.offset);
            entry.in_flight.pop_front();
            self.total_tracked -= 1;
        }

        let watermark = watermark.map(|offset| {
            debug!(
                topic = position.topic(),
                partition = position.partition_number(),
                offset,
                remaining = entry.in_flight.len(),
                "Released completed offsets"
            );
            TopicPartitionOffset::new(position.partition().clone(), offset)
        });

        Ok(watermark)
    }

    /// Offsets tracked but not yet released, across all partitions.
    pub fn total_tracked(&self) -> usize {
        self.total_tracked
    }

    pub fn in_flight(&self, partition: &Partition) -> usize {
        self.partitions
            .get(partition)
            .map_or(0, |p| p.in_flight.len())
    }
}
