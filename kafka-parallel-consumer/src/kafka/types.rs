use std::fmt;

use rdkafka::message::BorrowedMessage;
use rdkafka::Message;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition_number)
    }
}

/// A position inside a partition. This is the unit the offset bookkeeping and
/// the commit path work with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartitionOffset {
    partition: Partition,
    offset: i64,
}

impl TopicPartitionOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// An owned record fetched from the broker and handed to the user handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    position: TopicPartitionOffset,
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            position: TopicPartitionOffset::new(Partition::new(topic.into(), partition), offset),
            key,
            value,
        }
    }

    pub fn topic(&self) -> &str {
        self.position.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.position.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.position.offset()
    }

    pub fn partition(&self) -> &Partition {
        self.position.partition()
    }

    pub fn position(&self) -> &TopicPartitionOffset {
        &self.position
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn value_as_str(&self) -> Option<&str> {
        self.value().and_then(|v| std::str::from_utf8(v).ok())
    }
}

impl From<&BorrowedMessage<'_>> for Record {
    fn from(msg: &BorrowedMessage<'_>) -> Self {
        Self::new(
            msg.topic(),
            msg.partition(),
            msg.offset(),
            msg.key().map(<[u8]>::to_vec),
            msg.payload().map(<[u8]>::to_vec),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_order_by_offset_within_partition() {
        let partition = Partition::new("events".to_string(), 3);
        let low = TopicPartitionOffset::new(partition.clone(), 10);
        let high = TopicPartitionOffset::new(partition, 11);

        assert!(low < high);
        assert_eq!(low.to_string(), "events[3]@10");
    }

    #[test]
    fn test_record_accessors() {
        let record = Record::new("events", 1, 42, Some(b"k".to_vec()), Some(b"v".to_vec()));

        assert_eq!(record.topic(), "events");
        assert_eq!(record.partition_number(), 1);
        assert_eq!(record.offset(), 42);
        assert_eq!(record.key(), Some(&b"k"[..]));
        assert_eq!(record.value_as_str(), Some("v"));
        assert_eq!(
            record.position(),
            &TopicPartitionOffset::new(Partition::new("events".to_string(), 1), 42)
        );
    }
}
