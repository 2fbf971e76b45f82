use crate::model::{Interval, Ms};

/// Merge a start-sorted interval sequence into the minimum set of
/// non-overlapping intervals separated by at least `tolerance`.
///
/// Two intervals closer than the tolerance gap are fused because the
/// presence indicator is not worth clearing for that long, and every timer
/// saved is quota headroom. Ties merge: under-scheduling an update costs
/// nothing, over-scheduling risks the quota. A fused run keeps the first
/// interval's identity and the maximum end seen, so an interval fully
/// contained in its predecessor never shortens the run.
pub fn reduce(sorted: Vec<Interval>, tolerance: Ms) -> Vec<Interval> {
    debug_assert!(
        sorted.windows(2).all(|w| w[0].start <= w[1].start),
        "reduce input must be sorted by start"
    );
    let mut reduced: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = reduced.last_mut()
            && interval.start < last.end + tolerance
        {
            last.end = last.end.max(interval.end);
            continue;
        }
        reduced.push(interval);
    }
    reduced
}
