// compact.rs — Flatten per-level keypoint lists into one dense list.
//
// Mirrors the two GPU passes that follow peak detection: a saturating
// exclusive prefix sum over the per-level counts, then a gather that
// copies each level's records to its offset in the combined list. Both
// are defined against the *claimed* counts (which may exceed a level's
// storage capacity when it overflowed), saturated so the combined list
// never exceeds `max_total`.

use crate::peaks::{Keypoint, LevelPeaks};

/// Exclusive prefix sum of `counts`, clamped so no entry exceeds
/// `max_total`. Output has `counts.len() + 1` entries; the last is the
/// total number of records the combined list will hold.
pub fn accumulate(counts: &[usize], max_total: usize) -> Vec<usize> {
    let mut cum = Vec::with_capacity(counts.len() + 1);
    cum.push(0);
    for &c in counts {
        let prev = *cum.last().unwrap_or(&0);
        cum.push((prev + c).min(max_total));
    }
    cum
}

/// Gather the per-level lists into one flat list at the offsets
/// `accumulate` produced.
///
/// Each level contributes `cum[i+1] - cum[i]` slots. If a level claimed
/// more maxima than it stored, the surplus slots stay zeroed; sizing the
/// per-level capacities so this never happens is the caller's job.
///
/// # Panics
/// Panics unless `cum.len() == levels.len() + 1`.
pub fn concat_levels(levels: &[LevelPeaks], cum: &[usize]) -> Vec<Keypoint> {
    assert_eq!(
        cum.len(),
        levels.len() + 1,
        "offsets must be the accumulation of the level counts",
    );

    let mut out = vec![Keypoint::default(); *cum.last().unwrap_or(&0)];
    for (level, window) in levels.iter().zip(cum.windows(2)) {
        let span = window[1] - window[0];
        let stored = span.min(level.peaks.len());
        out[window[0]..window[0] + stored].copy_from_slice(&level.peaks[..stored]);
    }
    out
}

/// Convenience wrapper: accumulate the levels' found-counts and gather.
pub fn compact(levels: &[LevelPeaks], max_total: usize) -> Vec<Keypoint> {
    let counts: Vec<usize> = levels.iter().map(|l| l.found).collect();
    let cum = accumulate(&counts, max_total);
    concat_levels(levels, &cum)
}
