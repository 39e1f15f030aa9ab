//! Segment planning against the relay's per-object size ceiling.

use serde::{Deserialize, Serialize};

/// One planned segment of a source byte stream.
///
/// Segment `index` covers bytes `[offset, offset + size)` of the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// Zero-based segment index.
    pub index: u32,
    /// Byte offset into the source where this segment begins.
    pub offset: u64,
    /// Segment size in bytes. Equal to the ceiling for every segment but
    /// possibly the last.
    pub size: u64,
}

/// A deterministic segment plan for a source of known total length.
///
/// Segment `i` covers bytes `[i*C, min((i+1)*C, total))` for ceiling `C`.
/// The plan is purely a function of `(total, ceiling)`: it can be recomputed
/// at any time, and individual segments can be addressed out of order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentPlan {
    total: u64,
    ceiling: u64,
}

impl SegmentPlan {
    /// Create a plan for `total` bytes with the given per-segment ceiling.
    pub fn new(total: u64, ceiling: u64) -> crate::Result<Self> {
        if ceiling == 0 {
            return Err(crate::Error::InvalidSegmentSize {
                size: ceiling,
                min: 1,
                max: u64::MAX,
            });
        }
        Ok(Self { total, ceiling })
    }

    /// Total source length in bytes.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Per-segment size ceiling in bytes.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Number of segments in the plan. Zero for an empty source.
    pub fn segment_count(&self) -> u32 {
        self.total.div_ceil(self.ceiling) as u32
    }

    /// The span for segment `index`, or None past the end of the plan.
    pub fn segment(&self, index: u32) -> Option<SegmentSpan> {
        let offset = u64::from(index) * self.ceiling;
        if offset >= self.total {
            return None;
        }
        let size = (self.total - offset).min(self.ceiling);
        Some(SegmentSpan {
            index,
            offset,
            size,
        })
    }

    /// Iterate over all spans in index order.
    pub fn iter(&self) -> impl Iterator<Item = SegmentSpan> + '_ {
        (0..self.segment_count()).map(|i| {
            self.segment(i)
                .unwrap_or_else(|| unreachable!("index {i} < segment_count"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_zero_ceiling() {
        assert!(SegmentPlan::new(100, 0).is_err());
    }

    #[test]
    fn test_plan_segment_count_is_ceil_div() {
        let plan = SegmentPlan::new(100, 30).unwrap();
        assert_eq!(plan.segment_count(), 4);

        let exact = SegmentPlan::new(90, 30).unwrap();
        assert_eq!(exact.segment_count(), 3);

        let empty = SegmentPlan::new(0, 30).unwrap();
        assert_eq!(empty.segment_count(), 0);
        assert!(empty.segment(0).is_none());
    }

    #[test]
    fn test_plan_last_segment_takes_remainder() {
        let plan = SegmentPlan::new(100, 30).unwrap();
        let spans: Vec<_> = plan.iter().collect();
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0].size, 30);
        assert_eq!(spans[3].size, 10);
        assert_eq!(spans[3].offset, 90);
    }

    #[test]
    fn test_plan_exact_multiple_has_full_last_segment() {
        let plan = SegmentPlan::new(90, 30).unwrap();
        let last = plan.segment(2).unwrap();
        assert_eq!(last.size, 30);
        assert!(plan.segment(3).is_none());
    }

    #[test]
    fn test_plan_sizes_sum_to_total() {
        for (total, ceiling) in [(1u64, 1u64), (5_000_000, 2_000_000), (7, 3), (1023, 1024)] {
            let plan = SegmentPlan::new(total, ceiling).unwrap();
            let sum: u64 = plan.iter().map(|s| s.size).sum();
            assert_eq!(sum, total, "total={total} ceiling={ceiling}");
            assert_eq!(u64::from(plan.segment_count()), total.div_ceil(ceiling));
        }
    }

    #[test]
    fn test_plan_five_million_bytes_at_two_million_ceiling() {
        // The canonical example: 5,000,000 bytes at a 2,000,000-byte ceiling
        // yields segments of 2,000,000 / 2,000,000 / 1,000,000 at indices 0..2.
        let plan = SegmentPlan::new(5_000_000, 2_000_000).unwrap();
        let spans: Vec<_> = plan.iter().collect();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].size, 2_000_000);
        assert_eq!(spans[1].size, 2_000_000);
        assert_eq!(spans[2].size, 1_000_000);
        assert_eq!(spans[2].offset, 4_000_000);
        assert_eq!(
            spans.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_plan_is_restartable() {
        let plan = SegmentPlan::new(100, 30).unwrap();
        // Addressing a segment out of order yields the same span as iteration.
        let from_iter: Vec<_> = plan.iter().collect();
        assert_eq!(plan.segment(2), Some(from_iter[2]));
        assert_eq!(plan.segment(0), Some(from_iter[0]));
    }
}
