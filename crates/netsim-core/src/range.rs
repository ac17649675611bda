//! Range algebra over half-open integer ranges (§4.6): merge, subtract,
//! overlap, plus a `format_ranges` debug helper (supplemented from the
//! original `src/ranges.py`'s `range_format`).

use std::ops::Range;

/// The overlap between two half-open ranges, possibly empty.
pub fn overlap(x: &Range<i64>, y: &Range<i64>) -> Range<i64> {
    let start = x.start.max(y.start);
    let stop = x.end.min(y.end);
    if start < stop { start..stop } else { start..start }
}

/// Sort ranges by start and coalesce any that touch or overlap, producing a
/// disjoint, sorted list.
pub fn merge(ranges: impl IntoIterator<Item = Range<i64>>) -> Vec<Range<i64>> {
    let mut sorted: Vec<Range<i64>> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<Range<i64>> = Vec::new();
    for higher in sorted {
        match merged.last_mut() {
            Some(lower) if higher.start <= lower.end => {
                lower.end = lower.end.max(higher.end);
            }
            _ => merged.push(higher),
        }
    }
    merged
}

/// The maximal subranges of `x` not covered by any range in `to_remove`.
pub fn subtract(x: &Range<i64>, to_remove: impl IntoIterator<Item = Range<i64>>) -> Vec<Range<i64>> {
    let removed = merge(to_remove);
    let mut result = Vec::new();
    let mut start = x.start;
    for remove in &removed {
        if start > remove.end {
            break;
        }
        if remove.start > start {
            result.push(start..remove.start);
        }
        start = start.max(remove.end);
    }
    if start < x.end {
        result.push(start..x.end);
    }
    result
}

/// Render ranges as `a-b,c-d` (inclusive endpoints), for trace messages.
pub fn format_ranges(ranges: &[Range<i64>]) -> String {
    ranges
        .iter()
        .map(|r| format!("{}-{}", r.start, r.end - 1))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_basic() {
        assert_eq!(overlap(&(0..10), &(5..15)), 5..10);
        assert_eq!(overlap(&(0..5), &(5..10)), 5..5); // empty, touching
        assert_eq!(overlap(&(0..5), &(10..15)), 10..10); // empty, disjoint
    }

    #[test]
    fn merge_coalesces_touching_and_overlapping() {
        let merged = merge([0..5, 5..10, 20..25]);
        assert_eq!(merged, vec![0..10, 20..25]);
    }

    #[test]
    fn merge_is_fixpoint() {
        let once = merge([3..7, 0..2, 2..3, 100..200]);
        let twice = merge(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn subtract_is_complement_of_merge() {
        let x = 0..100;
        let holes = vec![10..20, 15..25, 90..95];
        let remaining = subtract(&x, holes.clone());
        let merged_holes = merge(holes);
        // every point of x is in exactly one of remaining/merged_holes
        for p in x.clone() {
            let in_remaining = remaining.iter().any(|r| r.contains(&p));
            let in_holes = merged_holes.iter().any(|r| r.contains(&p));
            assert_ne!(in_remaining, in_holes, "point {p} misclassified");
        }
    }

    #[test]
    fn subtract_whole_range() {
        assert_eq!(subtract(&(0..10), [0..10]), Vec::<Range<i64>>::new());
    }

    #[test]
    fn format_ranges_renders_inclusive() {
        assert_eq!(format_ranges(&[0..5, 10..11]), "0-4,10-10");
    }
}
