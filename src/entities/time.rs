//! Timeline time tokens: frame indices, inclusive ranges, play direction.
//!
//! Everything in the cache is keyed by `FrameIdx` at the timeline rate.
//! Seconds (read-ahead, read-behind) are converted once with the rate.

use serde::{Deserialize, Serialize};

/// Frame number at the timeline rate
pub type FrameIdx = i64;

/// Inclusive frame range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: FrameIdx,
    pub end: FrameIdx,
}

impl FrameRange {
    /// Build a range, swapping the ends if given backwards
    pub fn new(start: FrameIdx, end: FrameIdx) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Range covering a single frame
    pub fn single(frame: FrameIdx) -> Self {
        Self { start: frame, end: frame }
    }

    /// Number of frames in range
    pub fn len(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, frame: FrameIdx) -> bool {
        frame >= self.start && frame <= self.end
    }

    /// Clamp a frame into this range
    pub fn clamp(&self, frame: FrameIdx) -> FrameIdx {
        frame.clamp(self.start, self.end)
    }

    /// Intersection, or None when disjoint
    pub fn intersect(&self, other: &FrameRange) -> Option<FrameRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(FrameRange { start, end })
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<FrameIdx> {
        self.start..=self.end
    }
}

impl std::fmt::Display for FrameRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

/// Play direction, decides which side of the playhead is "ahead"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// +1 forward, -1 reverse
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    /// True if `frame` lies on the read-ahead side of `playhead` (playhead itself counts as ahead)
    pub fn is_ahead(self, playhead: FrameIdx, frame: FrameIdx) -> bool {
        match self {
            Direction::Forward => frame >= playhead,
            Direction::Reverse => frame <= playhead,
        }
    }
}

/// Frames kept around the playhead as sorted, disjoint ranges.
///
/// Clamped windows are a single range. Looping windows wrap across the
/// out -> in boundary and may split in two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWindow {
    ranges: Vec<FrameRange>,
    /// Read-ahead side, playhead included
    ahead: Vec<FrameRange>,
}

impl CacheWindow {
    /// Window cut off at the ends of `bounds`. `playhead` must lie inside `bounds`.
    pub fn clamped(playhead: FrameIdx, ahead: i64, behind: i64, direction: Direction, bounds: FrameRange) -> Self {
        let raw = match direction {
            Direction::Forward => FrameRange::new(playhead.saturating_sub(behind), playhead.saturating_add(ahead)),
            Direction::Reverse => FrameRange::new(playhead.saturating_sub(ahead), playhead.saturating_add(behind)),
        };
        let range = raw.intersect(&bounds).unwrap_or(FrameRange::single(playhead));
        let ahead_side = match direction {
            Direction::Forward => FrameRange::new(playhead, range.end),
            Direction::Reverse => FrameRange::new(range.start, playhead),
        };
        Self {
            ranges: vec![range],
            ahead: vec![ahead_side],
        }
    }

    /// Window that wraps inside `bounds`, never covering a frame twice.
    pub fn looped(playhead: FrameIdx, ahead: i64, behind: i64, direction: Direction, bounds: FrameRange) -> Self {
        let len = bounds.len() as i64;
        if len == 0 || !bounds.contains(playhead) {
            return Self::clamped(playhead, ahead, behind, direction, bounds);
        }
        let ahead_count = ahead.max(0).saturating_add(1).min(len);
        let behind_count = behind.max(0).min(len - ahead_count);

        let ahead_side = normalize(loop_span(bounds, playhead, ahead_count, direction));
        let mut ranges = ahead_side.clone();
        if behind_count > 0 {
            let first = wrap(bounds, playhead - direction.sign());
            ranges.extend(loop_span(bounds, first, behind_count, direction.reversed()));
        }
        Self {
            ranges: normalize(ranges),
            ahead: ahead_side,
        }
    }

    pub fn contains(&self, frame: FrameIdx) -> bool {
        self.ranges.iter().any(|r| r.contains(frame))
    }

    pub fn ranges(&self) -> &[FrameRange] {
        &self.ranges
    }

    pub fn ahead(&self) -> &[FrameRange] {
        &self.ahead
    }

    /// Every frame in the window, ascending
    pub fn frames(&self) -> impl Iterator<Item = FrameIdx> + '_ {
        self.ranges.iter().flat_map(|r| r.iter())
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().map(FrameRange::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<FrameRange> for CacheWindow {
    fn from(range: FrameRange) -> Self {
        Self {
            ranges: vec![range],
            ahead: vec![range],
        }
    }
}

impl PartialEq<FrameRange> for CacheWindow {
    fn eq(&self, other: &FrameRange) -> bool {
        self.ranges.as_slice() == [*other]
    }
}

impl std::fmt::Display for CacheWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

/// Step one frame past an end of `bounds` back to the other end
fn wrap(bounds: FrameRange, frame: FrameIdx) -> FrameIdx {
    if frame > bounds.end {
        bounds.start
    } else if frame < bounds.start {
        bounds.end
    } else {
        frame
    }
}

/// `count` frames from `from` (inclusive) in `direction`, wrapping inside `bounds`.
/// `count` must not exceed `bounds.len()`.
fn loop_span(bounds: FrameRange, from: FrameIdx, count: i64, direction: Direction) -> Vec<FrameRange> {
    if count <= 0 {
        return Vec::new();
    }
    match direction {
        Direction::Forward => {
            let last = from.saturating_add(count - 1);
            if last <= bounds.end {
                vec![FrameRange::new(from, last)]
            } else {
                let spill = last - bounds.end;
                vec![
                    FrameRange::new(from, bounds.end),
                    FrameRange::new(bounds.start, bounds.start + spill - 1),
                ]
            }
        }
        Direction::Reverse => {
            let first = from.saturating_sub(count - 1);
            if first >= bounds.start {
                vec![FrameRange::new(first, from)]
            } else {
                let spill = bounds.start - first;
                vec![
                    FrameRange::new(bounds.start, from),
                    FrameRange::new(bounds.end - spill + 1, bounds.end),
                ]
            }
        }
    }
}

/// Sort and merge overlapping or touching ranges
fn normalize(mut ranges: Vec<FrameRange>) -> Vec<FrameRange> {
    ranges.sort_by_key(|r| r.start);
    let mut out: Vec<FrameRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => last.end = last.end.max(range.end),
            _ => out.push(range),
        }
    }
    out
}

/// Convert seconds to a frame count at `rate`, rounding up.
///
/// Negative or non-finite input yields 0.
pub fn seconds_to_frames(seconds: f64, rate: f64) -> i64 {
    if !seconds.is_finite() || !rate.is_finite() || seconds <= 0.0 || rate <= 0.0 {
        return 0;
    }
    // Subtract a tiny epsilon so 5.0 * 24.0 doesn't ceil to 121 on float noise
    (seconds * rate - 1e-9).ceil().max(0.0) as i64
}

/// Fold frame indices into sorted contiguous ranges.
pub fn fold_ranges(frames: impl IntoIterator<Item = FrameIdx>) -> Vec<FrameRange> {
    let mut sorted: Vec<FrameIdx> = frames.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out: Vec<FrameRange> = Vec::new();
    for frame in sorted {
        match out.last_mut() {
            Some(last) if last.end + 1 == frame => last.end = frame,
            _ => out.push(FrameRange::single(frame)),
        }
    }
    out
}
