//! Assertion functions for partition plans and routing outcomes.

use crate::descriptor::PartitionDescriptor;

/// Assert that file partitions cover `[0, file_len)` exactly: contiguous, in
/// order, without gaps or overlaps, and all on one source.
///
/// An empty file must be planned as a single `[0, 0)` partition.
///
/// # Panics
///
/// Panics if a partition has no byte range or the ranges do not tile the file.
///
/// # Example
///
/// ```
/// use docsplit::descriptor::{ByteRange, PartitionDescriptor};
/// use docsplit::testing::assert_partitions_tile;
///
/// let parts = vec![
///     PartitionDescriptor::file("f", ByteRange::new(0, 10)),
///     PartitionDescriptor::file("f", ByteRange::new(10, 25)),
/// ];
/// assert_partitions_tile(&parts, 25);
/// ```
pub fn assert_partitions_tile(partitions: &[PartitionDescriptor], file_len: u64) {
    assert!(!partitions.is_empty(), "No partitions for a file of {file_len} bytes");
    let source = partitions[0].source();
    let mut expected_start = 0;
    for (i, p) in partitions.iter().enumerate() {
        let range = p
            .byte_range()
            .unwrap_or_else(|| panic!("Partition #{i} has no byte range: {p}"));
        assert_eq!(p.source(), source, "Partition #{i} is on another source");
        assert_eq!(
            range.start, expected_start,
            "Partition #{i} starts at {} but the previous one ended at {expected_start}",
            range.start
        );
        let end = range.end.unwrap_or(file_len);
        assert!(
            end > range.start || file_len == 0,
            "Partition #{i} is empty: {range}"
        );
        expected_start = end;
    }
    assert_eq!(
        expected_start, file_len,
        "Partitions end at {expected_start} but the file has {file_len} bytes"
    );
}

/// Assert that the `k`-th routed document went to destination `k % n`.
///
/// # Panics
///
/// Panics at the first out-of-turn assignment.
///
/// # Example
///
/// ```
/// use docsplit::testing::assert_round_robin;
///
/// assert_round_robin(&[0, 1, 2, 0, 1], 3);
/// ```
pub fn assert_round_robin(assignments: &[usize], n: usize) {
    for (k, &index) in assignments.iter().enumerate() {
        assert_eq!(
            index,
            k % n,
            "Document #{k} went to destination {index}, expected {}",
            k % n
        );
    }
}

/// Assert that per-destination counts differ by at most one.
///
/// # Panics
///
/// Panics if the distribution is unbalanced.
pub fn assert_balanced(counts: &[usize]) {
    let (Some(min), Some(max)) = (counts.iter().min(), counts.iter().max()) else {
        return;
    };
    assert!(max - min <= 1, "Unbalanced distribution: {counts:?}");
}
