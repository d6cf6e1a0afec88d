//! Timeline data structure
//!
//! The schedule is an arena of segment records linked by index. Copying a
//! schedule into the engine is a plain clone of the vector, and `next`/`prev`
//! are always mutual inverses because they are derived from input order.

use serde::{Deserialize, Serialize};

use super::error::{SchedulerError, SchedulerResult};
use crate::models::Segment;

// ============================================================================
// Segment Id
// ============================================================================

/// Index of a segment within its schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(usize);

impl SegmentId {
    /// Raw position in the timeline
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn at(index: usize) -> Self {
        Self(index)
    }
}

#[derive(Debug, Clone)]
struct Node {
    segment: Segment,
    prev: Option<usize>,
    next: Option<usize>,
}

// ============================================================================
// Schedule
// ============================================================================

/// Ordered, doubly linked timeline of segments
#[derive(Debug, Clone)]
pub struct Schedule {
    nodes: Vec<Node>,
}

impl Schedule {
    /// Link entries to their neighbours in input order
    pub fn build(entries: Vec<Segment>) -> SchedulerResult<Self> {
        if entries.is_empty() {
            return Err(SchedulerError::invalid_schedule("schedule has no segments"));
        }

        let last = entries.len() - 1;
        let nodes = entries
            .into_iter()
            .enumerate()
            .map(|(i, segment)| Node {
                segment,
                prev: i.checked_sub(1),
                next: (i < last).then_some(i + 1),
            })
            .collect();

        Ok(Self { nodes })
    }

    /// First segment of the timeline
    pub fn head(&self) -> SegmentId {
        SegmentId(0)
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a built schedule; present for API symmetry
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a segment
    pub fn get(&self, id: SegmentId) -> SchedulerResult<&Segment> {
        self.nodes
            .get(id.0)
            .map(|n| &n.segment)
            .ok_or_else(|| SchedulerError::segment_not_found(id.0))
    }

    /// Successor of `id`, if any
    pub fn next(&self, id: SegmentId) -> Option<SegmentId> {
        self.nodes.get(id.0).and_then(|n| n.next).map(SegmentId)
    }

    /// Predecessor of `id`, if any
    pub fn prev(&self, id: SegmentId) -> Option<SegmentId> {
        self.nodes.get(id.0).and_then(|n| n.prev).map(SegmentId)
    }

    /// Iterate over segments in timeline order
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (SegmentId(i), &n.segment))
    }

    /// Plain copy of the entries, in order
    pub fn to_entries(&self) -> Vec<Segment> {
        self.nodes.iter().map(|n| n.segment.clone()).collect()
    }

    /// Walk backward from `id` to the head of the timeline
    pub fn head_from(&self, id: SegmentId) -> SegmentId {
        let mut cursor = id;
        while let Some(prev) = self.prev(cursor) {
            cursor = prev;
        }
        cursor
    }

    /// Find the segment that should be active at `at_ms`, starting from `root`
    ///
    /// Walks forward while the next segment's toggle time is absent or not
    /// after `at_ms`. Returns `root` when no successor qualifies.
    pub fn find_starting_segment(&self, root: SegmentId, at_ms: i64) -> SegmentId {
        let mut cursor = root;
        while let Some(next) = self.next(cursor) {
            if !self.nodes[next.0].segment.toggle_passed(at_ms) {
                break;
            }
            cursor = next;
        }
        cursor
    }
}

// ============================================================================
// Tests
// ============================================================================
