//! # Segment tracking
//!
//! The receiving side of an acknowledged transaction stores the received file segments in a
//! sparse [ReceivedSegments] map and derives the missing ranges from it, which are then requested
//! with NAK PDUs. The missing ranges are always re-computed from the whole map so no stale gap
//! can survive the reception of new data.
//!
//! The sending side queues the segment requests of received NAK PDUs inside a
//! [RetransmissionQueue] and retransmits them in ascending order.
use alloc::collections::{BTreeMap, BTreeSet};

use crate::pdu::SegmentRequests;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum SegmentError {
    #[error("segment start {0} is larger than segment end {1}")]
    StartLargerThanEnd(u64, u64),
    #[error("segment end {end} exceeds the file size {file_size}")]
    BeyondFileSize { end: u64, file_size: u64 },
}

/// Sparse map of received file segments, keyed by offset.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceivedSegments {
    segments: BTreeMap<u64, u64>,
}

impl ReceivedSegments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storing a segment which was already received does not change the map. For segments
    /// sharing the same offset, the longest one is kept. Empty segments are ignored.
    pub fn insert(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let stored_len = self.segments.entry(offset).or_insert(len);
        *stored_len = (*stored_len).max(len);
    }

    pub fn number_of_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn reset(&mut self) {
        self.segments.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.segments.iter().map(|(offset, len)| (*offset, *len))
    }

    /// End offset of the segment which reaches furthest into the file.
    pub fn progress(&self) -> u64 {
        self.iter()
            .map(|(offset, len)| offset.saturating_add(len))
            .max()
            .unwrap_or(0)
    }

    /// Minimal list of disjoint (start, end) ranges which were not received yet.
    ///
    /// A leading (0, 0) entry requests the Metadata PDU if it was not received. If the file size
    /// is known, the range between the last received byte and the file size is missing as well.
    pub fn missing_segments(
        &self,
        metadata_received: bool,
        file_size: Option<u64>,
    ) -> SegmentRequests {
        let mut missing = SegmentRequests::new();
        if !metadata_received {
            missing.push((0, 0));
        }
        let mut covered_through = 0;
        for (offset, len) in self.iter() {
            if offset > covered_through {
                missing.push((covered_through, offset));
            }
            covered_through = covered_through.max(offset.saturating_add(len));
        }
        if let Some(file_size) = file_size {
            if covered_through < file_size {
                missing.push((covered_through, file_size));
            }
        }
        missing
    }
}

/// Item popped from the [RetransmissionQueue].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Retransmission {
    Metadata,
    FileData { offset: u64, len: u64 },
}

/// Sorted and de-duplicated segment requests received with NAK PDUs.
#[derive(Debug, Default, Clone)]
pub struct RetransmissionQueue {
    requests: BTreeSet<(u64, u64)>,
}

impl RetransmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one segment request. The (0, 0) request asks for the Metadata PDU.
    pub fn push(&mut self, request: (u64, u64), file_size: u64) -> Result<(), SegmentError> {
        let (start, end) = request;
        if start > end {
            return Err(SegmentError::StartLargerThanEnd(start, end));
        }
        if end > file_size {
            return Err(SegmentError::BeyondFileSize { end, file_size });
        }
        if start == end && start != 0 {
            return Ok(());
        }
        self.requests.insert(request);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Pop the next retransmission, limited to the given segment length. The remainder of a
    /// longer request stays queued.
    pub fn pop(&mut self, max_segment_len: u64) -> Option<Retransmission> {
        let (start, end) = self.requests.pop_first()?;
        if start == 0 && end == 0 {
            return Some(Retransmission::Metadata);
        }
        let len = (end - start).min(max_segment_len.max(1));
        if start + len < end {
            self.requests.insert((start + len, end));
        }
        Some(Retransmission::FileData { offset: start, len })
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn test_no_segments() {
        let segments = ReceivedSegments::new();
        assert!(segments.missing_segments(true, None).is_empty());
        assert_eq!(
            segments.missing_segments(false, None),
            SegmentRequests::from_slice(&[(0, 0)])
        );
        let expected: SegmentRequests = smallvec![(0, 0), (0, 100)];
        assert_eq!(segments.missing_segments(false, Some(100)), expected);
    }

    #[test]
    fn test_complete_file() {
        let mut segments = ReceivedSegments::new();
        for offset in (0..100).step_by(10) {
            segments.insert(offset, 10);
        }
        assert!(segments.missing_segments(true, Some(100)).is_empty());
        assert_eq!(segments.progress(), 100);
    }

    #[test]
    fn test_gaps_are_minimal_and_disjoint() {
        let mut segments = ReceivedSegments::new();
        segments.insert(10, 10);
        segments.insert(40, 5);
        segments.insert(45, 5);
        segments.insert(70, 10);
        let expected: SegmentRequests = smallvec![(0, 10), (20, 40), (50, 70), (80, 90)];
        assert_eq!(segments.missing_segments(true, Some(90)), expected);
    }

    #[test]
    fn test_unknown_file_size_has_no_trailing_gap() {
        let mut segments = ReceivedSegments::new();
        segments.insert(0, 10);
        segments.insert(20, 10);
        let expected: SegmentRequests = smallvec![(10, 20)];
        assert_eq!(segments.missing_segments(true, None), expected);
    }

    #[test]
    fn test_duplicate_segments_are_idempotent() {
        let mut segments = ReceivedSegments::new();
        segments.insert(0, 10);
        segments.insert(30, 10);
        let before = segments.missing_segments(true, Some(50));
        segments.insert(30, 10);
        segments.insert(0, 5);
        segments.insert(32, 3);
        assert_eq!(segments.missing_segments(true, Some(50)), before);
        assert_eq!(segments.number_of_segments(), 3);
        segments.insert(0, 0);
        assert_eq!(segments.number_of_segments(), 3);
    }

    #[test]
    fn test_overlapping_segments() {
        let mut segments = ReceivedSegments::new();
        segments.insert(0, 20);
        segments.insert(5, 5);
        segments.insert(15, 10);
        let expected: SegmentRequests = smallvec![(25, 30)];
        assert_eq!(segments.missing_segments(true, Some(30)), expected);
    }

    #[test]
    fn test_reverse_order_equals_in_order() {
        let mut in_order = ReceivedSegments::new();
        let mut reverse = ReceivedSegments::new();
        for offset in (0..50).step_by(10) {
            in_order.insert(offset, 10);
        }
        for offset in (0..50).step_by(10).collect::<alloc::vec::Vec<_>>().into_iter().rev() {
            reverse.insert(offset, 10);
        }
        assert_eq!(in_order, reverse);
        assert!(reverse.missing_segments(true, Some(50)).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut segments = ReceivedSegments::new();
        segments.insert(0, 10);
        segments.reset();
        assert!(segments.is_empty());
        assert_eq!(segments.progress(), 0);
    }

    #[test]
    fn test_retransmission_queue_order_and_dedup() {
        let mut queue = RetransmissionQueue::new();
        queue.push((20, 30), 100).unwrap();
        queue.push((0, 10), 100).unwrap();
        queue.push((20, 30), 100).unwrap();
        queue.push((0, 0), 100).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(64), Some(Retransmission::Metadata));
        assert_eq!(
            queue.pop(64),
            Some(Retransmission::FileData { offset: 0, len: 10 })
        );
        assert_eq!(
            queue.pop(64),
            Some(Retransmission::FileData {
                offset: 20,
                len: 10
            })
        );
        assert!(queue.pop(64).is_none());
    }

    #[test]
    fn test_retransmission_queue_splits_long_requests() {
        let mut queue = RetransmissionQueue::new();
        queue.push((0, 25), 100).unwrap();
        assert_eq!(
            queue.pop(10),
            Some(Retransmission::FileData { offset: 0, len: 10 })
        );
        assert_eq!(
            queue.pop(10),
            Some(Retransmission::FileData {
                offset: 10,
                len: 10
            })
        );
        assert_eq!(
            queue.pop(10),
            Some(Retransmission::FileData { offset: 20, len: 5 })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_invalid_segment_requests() {
        let mut queue = RetransmissionQueue::new();
        assert_eq!(
            queue.push((10, 5), 100).unwrap_err(),
            SegmentError::StartLargerThanEnd(10, 5)
        );
        assert_eq!(
            queue.push((10, 200), 100).unwrap_err(),
            SegmentError::BeyondFileSize {
                end: 200,
                file_size: 100
            }
        );
        queue.push((10, 10), 100).unwrap();
        assert!(queue.is_empty());
    }
}
