use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;

use siphasher::sip128::{Hasher128, SipHasher24};

use crate::config::ParallelismStrategy;
use crate::error::InvariantViolation;
use crate::kafka::types::{Partition, Record};

pub type RunnerId = usize;

/// Identifies a lane: records sharing a ticket are handled one at a time, in
/// the order they were fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ticket {
    Unique(u64),
    Partition(Partition),
    Key { topic: String, hash: u128 },
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ticket::Unique(id) => write!(f, "unique:{id}"),
            Ticket::Partition(partition) => write!(f, "partition:{partition}"),
            Ticket::Key { topic, hash } => write!(f, "key:{topic}:{hash:032x}"),
        }
    }
}

/// 128 bit SipHash-2-4 of a record key. A missing key hashes like an empty one.
pub fn key_hash(key: Option<&[u8]>) -> u128 {
    let mut hasher = SipHasher24::new();
    hasher.write(key.unwrap_or_default());
    let hash = hasher.finish128();
    (u128::from(hash.h1) << 64) | u128::from(hash.h2)
}

/// Maps records to lanes and keeps track of which runner serves each lane.
pub trait HandlingTracker: Send {
    fn strategy(&self) -> ParallelismStrategy;

    fn create_ticket(&mut self, record: &Record) -> Ticket;

    /// Runner currently serving the ticket's lane, if the lane is active.
    fn lane(&self, ticket: &Ticket) -> Option<RunnerId>;

    /// Opens a lane for the ticket with one record enqueued.
    fn register(&mut self, ticket: Ticket, runner: RunnerId) -> Result<(), InvariantViolation>;

    /// Adds one record behind an active lane and returns its runner.
    fn enqueue(&mut self, ticket: &Ticket) -> Result<RunnerId, InvariantViolation>;

    /// Completes one record of the lane. Returns the runner once the lane
    /// drained and was removed.
    fn complete_one(&mut self, ticket: &Ticket) -> Result<Option<RunnerId>, InvariantViolation>;

    fn active_lanes(&self) -> usize;
}

pub fn for_strategy(strategy: ParallelismStrategy) -> Box<dyn HandlingTracker> {
    match strategy {
        ParallelismStrategy::Unconstrained => Box::new(UnconstrainedTracker::default()),
        ParallelismStrategy::PerPartition => Box::new(PerPartitionTracker::default()),
        ParallelismStrategy::PerKey => Box::new(PerKeyTracker::default()),
    }
}

#[derive(Debug, Clone, Copy)]
struct Lane {
    runner: RunnerId,
    enqueued: usize,
}

#[derive(Debug, Default)]
struct LaneTable {
    lanes: HashMap<Ticket, Lane>,
}

impl LaneTable {
    fn lane(&self, ticket: &Ticket) -> Option<RunnerId> {
        self.lanes.get(ticket).map(|lane| lane.runner)
    }

    fn register(&mut self, ticket: Ticket, runner: RunnerId) -> Result<(), InvariantViolation> {
        if self.lanes.contains_key(&ticket) {
            return Err(InvariantViolation::LaneAlreadyRegistered(ticket.to_string()));
        }
        self.lanes.insert(
            ticket,
            Lane {
                runner,
                enqueued: 1,
            },
        );
        Ok(())
    }

    fn enqueue(&mut self, ticket: &Ticket) -> Result<RunnerId, InvariantViolation> {
        let lane = self
            .lanes
            .get_mut(ticket)
            .ok_or_else(|| InvariantViolation::UnknownLane(ticket.to_string()))?;
        lane.enqueued += 1;
        Ok(lane.runner)
    }

    fn complete_one(&mut self, ticket: &Ticket) -> Result<Option<RunnerId>, InvariantViolation> {
        let lane = self
            .lanes
            .get_mut(ticket)
            .ok_or_else(|| InvariantViolation::UnknownLane(ticket.to_string()))?;
        lane.enqueued -= 1;
        if lane.enqueued > 0 {
            return Ok(None);
        }

        let runner = lane.runner;
        self.lanes.remove(ticket);
        Ok(Some(runner))
    }
}

/// Every record gets its own lane, so records never wait for each other.
#[derive(Debug, Default)]
pub struct UnconstrainedTracker {
    next_ticket: u64,
    lanes: LaneTable,
}

impl HandlingTracker for UnconstrainedTracker {
    fn strategy(&self) -> ParallelismStrategy {
        ParallelismStrategy::Unconstrained
    }

    fn create_ticket(&mut self, _record: &Record) -> Ticket {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        Ticket::Unique(self.next_ticket)
    }

    fn lane(&self, ticket: &Ticket) -> Option<RunnerId> {
        self.lanes.lane(ticket)
    }

    fn register(&mut self, ticket: Ticket, runner: RunnerId) -> Result<(), InvariantViolation> {
        self.lanes.register(ticket, runner)
    }

    fn enqueue(&mut self, _ticket: &Ticket) -> Result<RunnerId, InvariantViolation> {
        Err(InvariantViolation::EnqueueNotSupported(
            self.strategy().as_str(),
        ))
    }

    fn complete_one(&mut self, ticket: &Ticket) -> Result<Option<RunnerId>, InvariantViolation> {
        self.lanes.complete_one(ticket)
    }

    fn active_lanes(&self) -> usize {
        self.lanes.lanes.len()
    }
}

#[derive(Debug, Default)]
pub struct PerPartitionTracker {
    lanes: LaneTable,
}

impl HandlingTracker for PerPartitionTracker {
    fn strategy(&self) -> ParallelismStrategy {
        ParallelismStrategy::PerPartition
    }

    fn create_ticket(&mut self, record: &Record) -> Ticket {
        Ticket::Partition(record.partition().clone())
    }

    fn lane(&self, ticket: &Ticket) -> Option<RunnerId> {
        self.lanes.lane(ticket)
    }

    fn register(&mut self, ticket: Ticket, runner: RunnerId) -> Result<(), InvariantViolation> {
        self.lanes.register(ticket, runner)
    }

    fn enqueue(&mut self, ticket: &Ticket) -> Result<RunnerId, InvariantViolation> {
        self.lanes.enqueue(ticket)
    }

    fn complete_one(&mut self, ticket: &Ticket) -> Result<Option<RunnerId>, InvariantViolation> {
        self.lanes.complete_one(ticket)
    }

    fn active_lanes(&self) -> usize {
        self.lanes.lanes.len()
    }
}

/// Lanes per topic and key hash. Colliding keys share a lane, which only
/// costs parallelism.
#[derive(Debug, Default)]
pub struct PerKeyTracker {
    lanes: LaneTable,
}

impl HandlingTracker for PerKeyTracker {
    fn strategy(&self) -> ParallelismStrategy {
        ParallelismStrategy::PerKey
    }

    fn create_ticket(&mut self, record: &Record) -> Ticket {
        Ticket::Key {
            topic: record.topic().to_string(),
            hash: key_hash(record.key()),
        }
    }

    fn lane(&self, ticket: &Ticket) -> Option<RunnerId> {
        self.lanes.lane(ticket)
    }

    fn register(&mut self, ticket: Ticket, runner: RunnerId) -> Result<(), InvariantViolation> {
        self.lanes.register(ticket, runner)
    }

    fn enqueue(&mut self, ticket: &Ticket) -> Result<RunnerId, InvariantViolation> {
        self.lanes.enqueue(ticket)
    }

    fn complete_one(&mut self, ticket: &Ticket) -> Result<Option<RunnerId>, InvariantViolation> {
        self.lanes.complete_one(ticket)
    }

    fn active_lanes(&self) -> usize {
        self.lanes.lanes.len()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn record(partition: i32, offset: i64, key: Option<&str>) -> Record {
        Record::new(
            "test-topic",
            partition,
            offset,
            key.map(|k| k.as_bytes().to_vec()),
            None,
        )
    }

    #[test]
    fn test_per_partition_tickets() {
        let mut tracker = PerPartitionTracker::default();

        let a = tracker.create_ticket(&record(0, 1, Some("a")));
        let b = tracker.create_ticket(&record(0, 2, Some("b")));
        let c = tracker.create_ticket(&record(1, 1, Some("a")));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_per_key_tickets() {
        let mut tracker = PerKeyTracker::default();

        let a = tracker.create_ticket(&record(0, 1, Some("a")));
        let a_other_partition = tracker.create_ticket(&record(3, 1, Some("a")));
        let b = tracker.create_ticket(&record(0, 2, Some("b")));

        assert_eq!(a, a_other_partition);
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_key_hashes_as_empty_key() {
        assert_eq!(key_hash(None), key_hash(Some(b"")));
        assert_ne!(key_hash(None), key_hash(Some(b"a")));
    }

    #[test]
    fn test_unconstrained_tickets_are_unique() {
        let mut tracker = UnconstrainedTracker::default();
        let r = record(0, 1, Some("a"));

        assert_ne!(tracker.create_ticket(&r), tracker.create_ticket(&r));
    }

    #[test]
    fn test_unconstrained_rejects_enqueue() {
        let mut tracker = UnconstrainedTracker::default();
        let ticket = tracker.create_ticket(&record(0, 1, None));
        tracker.register(ticket.clone(), 0).unwrap();

        assert_eq!(
            tracker.enqueue(&ticket).unwrap_err(),
            InvariantViolation::EnqueueNotSupported("unconstrained")
        );
        assert_eq!(tracker.complete_one(&ticket).unwrap(), Some(0));
        assert!(tracker.complete_one(&ticket).is_err());
    }

    #[test_case(ParallelismStrategy::PerPartition)]
    #[test_case(ParallelismStrategy::PerKey)]
    fn test_lane_lifecycle(strategy: ParallelismStrategy) {
        let mut tracker = for_strategy(strategy);
        let ticket = tracker.create_ticket(&record(0, 1, Some("k")));

        assert_eq!(tracker.lane(&ticket), None);
        tracker.register(ticket.clone(), 3).unwrap();
        assert!(tracker.register(ticket.clone(), 4).is_err());

        assert_eq!(tracker.enqueue(&ticket).unwrap(), 3);
        assert_eq!(tracker.lane(&ticket), Some(3));
        assert_eq!(tracker.active_lanes(), 1);

        assert_eq!(tracker.complete_one(&ticket).unwrap(), None);
        assert_eq!(tracker.complete_one(&ticket).unwrap(), Some(3));
        assert_eq!(tracker.lane(&ticket), None);
        assert_eq!(tracker.active_lanes(), 0);
    }

    #[test_case(ParallelismStrategy::PerPartition)]
    #[test_case(ParallelismStrategy::PerKey)]
    fn test_unknown_lane(strategy: ParallelismStrategy) {
        let mut tracker = for_strategy(strategy);
        let ticket = tracker.create_ticket(&record(0, 1, Some("k")));

        assert!(matches!(
            tracker.enqueue(&ticket),
            Err(InvariantViolation::UnknownLane(_))
        ));
        assert!(matches!(
            tracker.complete_one(&ticket),
            Err(InvariantViolation::UnknownLane(_))
        ));
    }
}
