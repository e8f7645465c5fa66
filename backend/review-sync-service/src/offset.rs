use std::collections::HashMap;

use crate::events::{PartitionId, Position};

/// Last fully processed position per partition.
///
/// Each worker owns one tracker for the partitions it consumes. The tracker
/// only decides what is safe to commit; persisting it is the message source's
/// job.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    processed: HashMap<PartitionId, Position>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `position` as fully processed. Returns whether the tracked
    /// position moved; positions at or below the current one are ignored.
    pub fn record_processed(&mut self, partition: &PartitionId, position: Position) -> bool {
        match self.processed.get_mut(partition) {
            Some(current) if *current >= position => false,
            Some(current) => {
                *current = position;
                true
            }
            None => {
                self.processed.insert(partition.clone(), position);
                true
            }
        }
    }

    /// Highest position that is safe to commit for `partition`.
    pub fn commit_point(&self, partition: &PartitionId) -> Option<Position> {
        self.processed.get(partition).copied()
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&PartitionId, Position)> + '_ {
        self.processed.iter().map(|(partition, position)| (partition, *position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_partition_has_no_commit_point() {
        let tracker = OffsetTracker::new();
        assert_eq!(tracker.commit_point(&PartitionId::new("reviews", 0)), None);
    }

    #[test]
    fn test_commit_point_never_decreases() {
        let mut tracker = OffsetTracker::new();
        let p0 = PartitionId::new("reviews", 0);

        assert!(tracker.record_processed(&p0, 5));
        assert!(tracker.record_processed(&p0, 9));
        assert!(!tracker.record_processed(&p0, 7));
        assert!(!tracker.record_processed(&p0, 9));

        assert_eq!(tracker.commit_point(&p0), Some(9));
    }

    #[test]
    fn test_partitions_are_tracked_independently() {
        let mut tracker = OffsetTracker::new();
        let p0 = PartitionId::new("reviews", 0);
        let p1 = PartitionId::new("reviews", 1);

        tracker.record_processed(&p0, 100);
        tracker.record_processed(&p1, 3);

        assert_eq!(tracker.commit_point(&p0), Some(100));
        assert_eq!(tracker.commit_point(&p1), Some(3));
        assert_eq!(tracker.partitions().count(), 2);
    }
}
