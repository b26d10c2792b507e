//! Timeline/composition model consumed by the cache.
//!
//! The cache never walks tracks itself. It asks a `Timeline` which source
//! (file path + local frame) backs a given timeline frame, and hands that
//! to a reader. `Composition` is a simple clip list good enough for image
//! sequences and the headless player.

use std::path::PathBuf;

use log::debug;
use uuid::Uuid;

use super::time::{FrameIdx, FrameRange};

/// Resolved source for one timeline frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    /// Clip the frame belongs to
    pub clip: Uuid,
    /// File to read
    pub path: PathBuf,
    /// Frame index local to the source media
    pub local_frame: FrameIdx,
}

/// Composition structure as seen by the cache
pub trait Timeline: Send + Sync {
    /// Full timeline extent (inclusive)
    fn range(&self) -> FrameRange;

    /// Frames per second
    fn rate(&self) -> f64;

    /// Source backing video at `frame`, None for gaps
    fn resolve_video(&self, frame: FrameIdx) -> Option<SourceRef>;

    /// Source backing audio at `frame`, None if silent/no audio
    fn resolve_audio(&self, frame: FrameIdx) -> Option<SourceRef>;
}

/// Clip placed on the timeline
///
/// `pattern` is a sequence mask: `shot.####.exr` (hash padding) or
/// `shot.%04d.exr` (printf padding). A mask without a frame token refers to
/// a single file (movie/still) and gets the local frame passed to the reader.
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: Uuid,
    pub pattern: String,
    /// First source frame used by the clip
    pub source_start: FrameIdx,
    /// Timeline frame the clip starts at
    pub timeline_start: FrameIdx,
    /// Number of frames
    pub duration: i64,
    /// Audio source (same-file mask syntax), if any
    pub audio: Option<String>,
}

impl Clip {
    pub fn new(pattern: impl Into<String>, source_start: FrameIdx, timeline_start: FrameIdx, duration: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern: pattern.into(),
            source_start,
            timeline_start,
            duration: duration.max(0),
            audio: None,
        }
    }

    /// Attach an audio source
    pub fn with_audio(mut self, audio: impl Into<String>) -> Self {
        self.audio = Some(audio.into());
        self
    }

    /// Timeline frames covered by this clip, None if empty
    pub fn timeline_range(&self) -> Option<FrameRange> {
        (self.duration > 0).then(|| {
            FrameRange::new(self.timeline_start, self.timeline_start + self.duration - 1)
        })
    }

    fn local_frame(&self, frame: FrameIdx) -> Option<FrameIdx> {
        let range = self.timeline_range()?;
        range
            .contains(frame)
            .then(|| self.source_start + (frame - self.timeline_start))
    }
}

/// Ordered clip list on a single track; later clips win where they overlap
#[derive(Debug, Clone)]
pub struct Composition {
    rate: f64,
    clips: Vec<Clip>,
}

impl Composition {
    pub fn new(rate: f64) -> Self {
        Self { rate, clips: Vec::new() }
    }

    /// Single-clip composition for an image sequence starting at timeline frame 0
    pub fn from_sequence(pattern: impl Into<String>, first: FrameIdx, last: FrameIdx, rate: f64) -> Self {
        let range = FrameRange::new(first, last);
        let mut comp = Self::new(rate);
        comp.add_clip(Clip::new(pattern, range.start, 0, range.len() as i64));
        comp
    }

    pub fn add_clip(&mut self, clip: Clip) {
        debug!(
            "Composition: clip {} '{}' at {:?}",
            clip.id,
            clip.pattern,
            clip.timeline_range()
        );
        self.clips.push(clip);
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    fn clip_at(&self, frame: FrameIdx) -> Option<(&Clip, FrameIdx)> {
        self.clips
            .iter()
            .rev()
            .find_map(|clip| clip.local_frame(frame).map(|local| (clip, local)))
    }
}

impl Timeline for Composition {
    fn range(&self) -> FrameRange {
        let mut ranges = self.clips.iter().filter_map(|c| c.timeline_range());
        let Some(first) = ranges.next() else {
            return FrameRange::single(0);
        };
        ranges.fold(first, |acc, r| {
            FrameRange::new(acc.start.min(r.start), acc.end.max(r.end))
        })
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn resolve_video(&self, frame: FrameIdx) -> Option<SourceRef> {
        let (clip, local) = self.clip_at(frame)?;
        Some(SourceRef {
            clip: clip.id,
            path: PathBuf::from(expand_pattern(&clip.pattern, local)),
            local_frame: local,
        })
    }

    fn resolve_audio(&self, frame: FrameIdx) -> Option<SourceRef> {
        let (clip, local) = self.clip_at(frame)?;
        let audio = clip.audio.as_ref()?;
        Some(SourceRef {
            clip: clip.id,
            path: PathBuf::from(expand_pattern(audio, local)),
            local_frame: local,
        })
    }
}

/// Substitute a frame number into a sequence mask.
///
/// Supports `####` (pad = hash count) and `%0Nd` / `%d`. The first token
/// wins; masks without a token are returned unchanged.
pub fn expand_pattern(pattern: &str, frame: FrameIdx) -> String {
    if let Some(start) = pattern.find('#') {
        let pad = pattern[start..].chars().take_while(|&c| c == '#').count();
        let sign = if frame < 0 { "-" } else { "" };
        return format!(
            "{}{}{:0pad$}{}",
            &pattern[..start],
            sign,
            frame.unsigned_abs(),
            &pattern[start + pad..],
            pad = pad
        );
    }

    if let Some(start) = pattern.find('%') {
        let rest = &pattern[start + 1..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if rest[digits.len()..].starts_with('d') {
            let pad = digits.trim_start_matches('0').parse::<usize>().unwrap_or(0);
            let sign = if frame < 0 { "-" } else { "" };
            return format!(
                "{}{}{:0pad$}{}",
                &pattern[..start],
                sign,
                frame.unsigned_abs(),
                &rest[digits.len() + 1..],
                pad = pad
            );
        }
    }

    pattern.to_string()
}
