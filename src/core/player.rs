//! Playback clock with frame-accurate timing and JKL controls
//!
//! **Architecture**: Player does NOT own the cache. It receives
//! `&mut CacheManager` when methods need it, so the driver (binary, UI loop)
//! stays the single owner and single writer of the cache.
//!
//! **Why**: Playback needs:
//! - Frame-accurate timing (not wall-clock jitter)
//! - JKL shuttle controls (J=reverse, K=pause, L=forward)
//! - A defined answer when the wanted frame isn't decoded yet
//!
//! # Timing Model
//!
//! FPS-based: each frame has a fixed duration (1/fps seconds). `update()`
//! advances by however many whole durations elapsed since the last advance
//! and keeps the remainder, so a slow tick skips frames instead of drifting.
//!
//! # Misses
//!
//! - `HoldLast`: keep showing the last good frame (no black flash)
//! - `Placeholder`: show a flat placeholder frame
//! - `Stall`: don't advance until the current frame is resident

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use super::cache_man::{CacheManager, KeyState};
use super::request_queue::Tier;
use crate::entities::{AudioSegment, Direction, FrameIdx, FrameRange, Lookup, VideoFrame};

/// FPS presets for jog/shuttle control
const FPS_PRESETS: &[f64] = &[1.0, 2.0, 4.0, 8.0, 12.0, 24.0, 30.0, 60.0, 120.0, 240.0, 480.0, 960.0];

/// Frame step size for Shift+Arrow style jumps
pub const FRAME_JUMP_STEP: i64 = 25;

/// Placeholder size (the viewer scales it)
const PLACEHOLDER_SIZE: usize = 16;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Playback {
    #[default]
    Stop,
    Forward,
    Reverse,
}

/// Behavior at the in/out boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Loop {
    #[default]
    Loop,
    Once,
    PingPong,
}

/// What to show when the current frame isn't resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissPolicy {
    #[default]
    HoldLast,
    Placeholder,
    Stall,
}

/// Image handed to the viewer for one tick
#[derive(Debug, Clone)]
pub enum Shown {
    /// The current frame itself
    Ready(Arc<VideoFrame>),
    /// Last good frame, current one is missing
    Held(Arc<VideoFrame>),
    Placeholder(Arc<VideoFrame>),
    /// Nothing decoded yet
    Nothing,
}

impl Shown {
    pub fn is_ready(&self) -> bool {
        matches!(self, Shown::Ready(_))
    }

    pub fn image(&self) -> Option<&Arc<VideoFrame>> {
        match self {
            Shown::Ready(f) | Shown::Held(f) | Shown::Placeholder(f) => Some(f),
            Shown::Nothing => None,
        }
    }
}

/// Result of one `update()`
#[derive(Debug, Clone)]
pub struct Tick {
    pub frame: FrameIdx,
    pub shown: Shown,
    /// Audio for the current frame if resident
    pub audio: Option<Arc<AudioSegment>>,
    /// Frames moved this tick (0 when paused or stalled)
    pub advanced: i64,
}

/// Playback state manager (does NOT own the cache)
#[derive(Debug)]
pub struct Player {
    playback: Playback,
    /// Direction to resume in after stop/toggle
    last_direction: Direction,
    loop_mode: Loop,
    miss_policy: MissPolicy,

    /// Persistent base FPS
    fps_base: f64,
    /// Temporary playback FPS (jog/shuttle)
    fps_play: f64,

    frame: FrameIdx,
    full_range: FrameRange,
    in_out: FrameRange,

    /// Time the current frame started (runtime-only)
    last_frame_time: Option<Instant>,
    last_shown: Option<Arc<VideoFrame>>,
    placeholder: Arc<VideoFrame>,
}

impl Player {
    /// Create a player for the cache's timeline, parked at its first frame
    pub fn new(cache: &CacheManager) -> Self {
        let full_range = cache.timeline().range();
        let fps = cache.timeline().rate();
        info!("Player initialized: range {}, {} fps", full_range, fps);

        Self {
            playback: Playback::Stop,
            last_direction: Direction::Forward,
            loop_mode: Loop::default(),
            miss_policy: MissPolicy::default(),
            fps_base: fps,
            fps_play: fps,
            frame: full_range.start,
            full_range,
            in_out: full_range,
            last_frame_time: None,
            last_shown: None,
            placeholder: Arc::new(VideoFrame::placeholder(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE)),
        }
    }

    // === Accessors ===

    pub fn current_frame(&self) -> FrameIdx {
        self.frame
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn is_playing(&self) -> bool {
        self.playback != Playback::Stop
    }

    /// Direction the cache window should lean
    pub fn direction(&self) -> Direction {
        match self.playback {
            Playback::Forward => Direction::Forward,
            Playback::Reverse => Direction::Reverse,
            Playback::Stop => self.last_direction,
        }
    }

    pub fn loop_mode(&self) -> Loop {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: Loop) {
        self.loop_mode = mode;
    }

    pub fn miss_policy(&self) -> MissPolicy {
        self.miss_policy
    }

    pub fn set_miss_policy(&mut self, policy: MissPolicy) {
        self.miss_policy = policy;
    }

    pub fn fps_base(&self) -> f64 {
        self.fps_base
    }

    pub fn set_fps_base(&mut self, fps: f64) {
        if fps > 0.0 && fps.is_finite() {
            self.fps_base = fps;
            if !self.is_playing() {
                self.fps_play = fps;
            }
        }
    }

    pub fn fps_play(&self) -> f64 {
        self.fps_play
    }

    /// Playback speed relative to base FPS (signed by direction)
    pub fn speed(&self) -> f64 {
        let ratio = self.fps_play / self.fps_base;
        match self.playback {
            Playback::Forward => ratio,
            Playback::Reverse => -ratio,
            Playback::Stop => 0.0,
        }
    }

    pub fn in_out_range(&self) -> FrameRange {
        self.in_out
    }

    /// Push direction and loop mode to the cache so its window leans and
    /// wraps the way playback will move. `update()` does this every tick.
    pub fn sync_cache(&self, cache: &mut CacheManager) {
        cache.set_looping(self.loop_mode == Loop::Loop);
        cache.set_direction(self.direction());
    }

    // === Clock ===

    /// Advance using the wall clock. Call once per UI/driver tick.
    pub fn update(&mut self, cache: &mut CacheManager) -> Tick {
        self.update_at(cache, Instant::now())
    }

    /// Advance to `now`, sync the cache window, and pick what to show.
    pub fn update_at(&mut self, cache: &mut CacheManager, now: Instant) -> Tick {
        cache.process_results();

        let mut advanced = 0;
        if self.is_playing() {
            // base_fps acts as a floor that pushes play_fps from below
            if self.fps_play < self.fps_base {
                self.fps_play = self.fps_base;
            }

            match self.last_frame_time {
                Some(last) => {
                    let elapsed = now.saturating_duration_since(last).as_secs_f64();
                    let due = (elapsed * self.fps_play).floor() as i64;
                    if due > 0 {
                        if self.miss_policy == MissPolicy::Stall && !self.is_settled(cache, self.frame) {
                            trace!("Stalled on frame {}", self.frame);
                            self.last_frame_time = Some(now);
                        } else {
                            advanced = self.advance(due);
                            if self.is_playing() {
                                let consumed = Duration::from_secs_f64(due as f64 / self.fps_play);
                                self.last_frame_time = Some(last + consumed);
                            }
                        }
                    }
                }
                None => self.last_frame_time = Some(now),
            }
        }

        self.sync_cache(cache);
        cache.set_playhead(self.frame);

        let shown = self.resolve_shown(cache.query_video(self.frame));
        let audio = if self.is_playing() {
            cache.query_audio(self.frame).ready()
        } else {
            None
        };
        cache.flush_observers();

        Tick {
            frame: self.frame,
            shown,
            audio,
            advanced,
        }
    }

    /// Frame is resident, known-bad, or a gap: nothing left to wait for
    fn is_settled(&self, cache: &CacheManager, frame: FrameIdx) -> bool {
        match cache.key_state(Tier::Video, frame) {
            KeyState::Cached => true,
            KeyState::Requested { .. } => false,
            KeyState::Uncached => cache.timeline().resolve_video(frame).is_none(),
        }
    }

    fn resolve_shown(&mut self, lookup: Lookup<VideoFrame>) -> Shown {
        if let Lookup::Ready(frame) = lookup {
            self.last_shown = Some(Arc::clone(&frame));
            return Shown::Ready(frame);
        }
        match self.miss_policy {
            MissPolicy::Placeholder => Shown::Placeholder(Arc::clone(&self.placeholder)),
            MissPolicy::HoldLast | MissPolicy::Stall => match &self.last_shown {
                Some(frame) => Shown::Held(Arc::clone(frame)),
                None => Shown::Nothing,
            },
        }
    }

    /// Move `count` frames in play direction. Returns frames actually moved.
    fn advance(&mut self, count: i64) -> i64 {
        let mut moved = 0;
        for _ in 0..count {
            if !self.advance_one() {
                break;
            }
            moved += 1;
        }
        moved
    }

    fn advance_one(&mut self) -> bool {
        let FrameRange { start, end } = self.in_out;
        if !self.in_out.contains(self.frame) {
            self.frame = match self.playback {
                Playback::Reverse => end,
                _ => start,
            };
        }

        match self.playback {
            Playback::Stop => false,
            Playback::Forward => {
                if self.frame < end {
                    self.frame += 1;
                    return true;
                }
                match self.loop_mode {
                    Loop::Loop => {
                        trace!("Frame loop: {} -> {}", self.frame, start);
                        self.frame = start;
                        true
                    }
                    Loop::Once => {
                        trace!("Reached play range end, stopping");
                        self.stop();
                        false
                    }
                    Loop::PingPong => {
                        self.playback = Playback::Reverse;
                        self.last_direction = Direction::Reverse;
                        self.frame = (end - 1).max(start);
                        true
                    }
                }
            }
            Playback::Reverse => {
                if self.frame > start {
                    self.frame -= 1;
                    return true;
                }
                match self.loop_mode {
                    Loop::Loop => {
                        trace!("Frame loop: {} -> {}", self.frame, end);
                        self.frame = end;
                        true
                    }
                    Loop::Once => {
                        trace!("Reached play range start, stopping");
                        self.stop();
                        false
                    }
                    Loop::PingPong => {
                        self.playback = Playback::Forward;
                        self.last_direction = Direction::Forward;
                        self.frame = (start + 1).min(end);
                        true
                    }
                }
            }
        }
    }

    // === Transport ===

    pub fn play_forward(&mut self) {
        self.start(Direction::Forward);
    }

    pub fn play_reverse(&mut self) {
        self.start(Direction::Reverse);
    }

    fn start(&mut self, direction: Direction) {
        self.playback = match direction {
            Direction::Forward => Playback::Forward,
            Direction::Reverse => Playback::Reverse,
        };
        self.last_direction = direction;
        self.fps_play = self.fps_base;
        self.last_frame_time = None;
        debug!("Play {:?} at {} fps", direction, self.fps_play);
    }

    /// Space: play/pause, resuming in the last direction
    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.start(self.last_direction);
        }
    }

    /// Stop playback (always stops, doesn't toggle)
    pub fn stop(&mut self) {
        if self.is_playing() {
            self.playback = Playback::Stop;
            self.last_frame_time = None;
            // Reset fps_play to fps_base on stop
            self.fps_play = self.fps_base;
            trace!("Playback stopped");
        }
    }

    /// Jump to `frame` (clamped to in/out). Starts a new cache generation.
    pub fn seek(&mut self, cache: &mut CacheManager, frame: FrameIdx) {
        self.frame = self.in_out.clamp(frame);
        self.last_frame_time = None;
        self.sync_cache(cache);
        cache.seek(self.frame);
    }

    /// Step by N frames (positive = forward, negative = backward).
    ///
    /// Wraps around the in/out range in `Loop` mode, clamps otherwise.
    pub fn step(&mut self, cache: &mut CacheManager, count: i64) {
        if count == 0 {
            return;
        }
        let FrameRange { start, end } = self.in_out;
        let range_size = end - start + 1;
        let target = self.frame.saturating_add(count);
        let looping = self.loop_mode == Loop::Loop;

        let final_frame = if target > end {
            if looping {
                let overflow = target - end;
                start + ((overflow - 1) % range_size)
            } else {
                end
            }
        } else if target < start {
            if looping {
                let underflow = start - target;
                end - ((underflow - 1) % range_size)
            } else {
                start
            }
        } else {
            target
        };

        self.frame = final_frame;
        self.last_frame_time = None;
        self.sync_cache(cache);
        cache.set_playhead(self.frame);
    }

    pub fn frame_next(&mut self, cache: &mut CacheManager) {
        self.step(cache, 1);
    }

    pub fn frame_prev(&mut self, cache: &mut CacheManager) {
        self.step(cache, -1);
    }

    /// Rewind to in point
    pub fn to_start(&mut self, cache: &mut CacheManager) {
        trace!("Rewinding to frame {}", self.in_out.start);
        self.seek(cache, self.in_out.start);
    }

    /// Skip to out point
    pub fn to_end(&mut self, cache: &mut CacheManager) {
        trace!("Skipping to end: frame {}", self.in_out.end);
        self.seek(cache, self.in_out.end);
    }

    // === Jog / shuttle ===

    fn start_jog(&mut self, direction: Direction) {
        if !self.is_playing() {
            self.start(direction);
            self.last_frame_time = Some(Instant::now());
        } else if self.direction() != direction {
            // Change direction, reset speed
            self.start(direction);
        } else {
            // Already playing in same direction, increase speed
            self.increase_fps_play();
        }
    }

    /// Jog forward (L)
    pub fn jog_forward(&mut self) {
        self.start_jog(Direction::Forward);
    }

    /// Jog backward (J)
    pub fn jog_backward(&mut self) {
        self.start_jog(Direction::Reverse);
    }

    /// Increase base FPS to next preset
    pub fn increase_fps_base(&mut self) {
        if let Some(&fps) = FPS_PRESETS.iter().find(|&&f| f > self.fps_base) {
            self.set_fps_base(fps);
            trace!("Base FPS increased to {}", fps);
        }
    }

    /// Decrease base FPS to previous preset
    pub fn decrease_fps_base(&mut self) {
        if let Some(&fps) = FPS_PRESETS.iter().rev().find(|&&f| f < self.fps_base) {
            self.set_fps_base(fps);
            trace!("Base FPS decreased to {}", fps);
        }
    }

    fn increase_fps_play(&mut self) {
        if let Some(&fps) = FPS_PRESETS.iter().find(|&&f| f > self.fps_play) {
            self.fps_play = fps;
            trace!("Play FPS increased to {}", fps);
        }
    }

    // === In/out ===

    /// Restrict playback (and caching) to `range` within the timeline
    pub fn set_in_out_range(&mut self, cache: &mut CacheManager, range: FrameRange) {
        self.in_out = range.intersect(&self.full_range).unwrap_or(self.full_range);
        self.frame = self.in_out.clamp(self.frame);
        cache.set_in_out_range(self.in_out);
        debug!("In/out set to {}", self.in_out);
    }

    /// Back to the full timeline extent
    pub fn reset_in_out_range(&mut self, cache: &mut CacheManager) {
        self.set_in_out_range(cache, self.full_range);
    }
}
