//! Timeline cache manager: read-ahead/read-behind window around the playhead
//!
//! **Why**: Decoding takes milliseconds to seconds; the playback clock can't
//! wait. The manager keeps a window of decoded frames around the playhead,
//! schedules background decodes as the window moves, and answers "frame at
//! T?" without ever blocking.
//!
//! **Used by**: Player (every tick), UI (cache info observer)
//!
//! # Key lifecycle
//!
//! `Uncached` → `Requested` → `Cached` → (window exit / LRU) → `Uncached`.
//! A `Requested` key whose result comes back with an old generation is
//! dropped (effectively `Uncached` again).
//!
//! # Generations
//!
//! The generation counter is shared with the workers. It moves on every
//! seek, on cache clear, and whenever a window move strands a `Requested`
//! key outside the window. Results stamped with an older generation are
//! discarded unconditionally, so a fast seek back-and-forth can never let
//! stale frames overwrite fresh ones.
//!
//! # Looping
//!
//! While playback loops (`set_looping(true)`) the window wraps inside the
//! in/out range: read-ahead near the out point continues from the in point,
//! so the first frames of the next cycle are resident before the wrap.
//!
//! # Failures
//!
//! Transient reader errors get one retry. Anything else is cached as an
//! `Unavailable` sentinel until the key leaves the window, so a known-bad
//! frame isn't re-requested every tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use log::{debug, info, trace, warn};
use thiserror::Error;

use super::lru_cache::LruCache;
use super::observer::Observable;
use super::options::{CacheOptions, OptionsError};
use super::request_queue::{Priority, Request, RequestQueue, Tier};
use super::workers::{self, Decoded, WorkerResult, Workers};
use crate::entities::time::{fold_ranges, seconds_to_frames};
use crate::entities::{
    AudioSegment, CacheEntry, CacheWindow, Direction, FrameIdx, FrameRange, Lookup, ReadOptions,
    ReaderRegistry, Timeline, VideoFrame,
};

/// Cache manager construction errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("failed to spawn decode workers: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Observable cache summary for UI/progress display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerCacheInfo {
    /// Share of the read-ahead side of the window that is resident (0-100)
    pub percentage: f64,
    /// Cached video entries (sentinels included)
    pub video_frames: usize,
    /// Cached audio entries (sentinels included)
    pub audio_frames: usize,
    /// Cached video keys folded into contiguous ranges
    pub video_ranges: Vec<FrameRange>,
    /// Cached audio keys folded into contiguous ranges
    pub audio_ranges: Vec<FrameRange>,
}

/// Per-key state as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Uncached,
    Requested { generation: u64, attempt: u8 },
    Cached,
}

/// What happened to a merged worker result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Decoded payload inserted
    Inserted,
    /// Transient failure, request re-issued
    Retried,
    /// Permanent failure, sentinel inserted
    Unavailable,
    /// Old generation or outside the window, dropped
    Stale,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserted: u64,
    pub stale: u64,
    pub retries: u64,
    pub failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    attempt: u8,
}

/// Timeline playback cache (single writer: the playback driver)
pub struct CacheManager {
    timeline: Arc<dyn Timeline>,
    registry: Arc<ReaderRegistry>,
    options: CacheOptions,
    read_options: ReadOptions,

    in_out: FrameRange,
    playhead: FrameIdx,
    direction: Direction,
    looping: bool,
    window: CacheWindow,

    video: LruCache<FrameIdx, CacheEntry<VideoFrame>>,
    audio: LruCache<FrameIdx, CacheEntry<AudioSegment>>,
    requested: HashMap<(Tier, FrameIdx), Pending>,

    generation: Arc<AtomicU64>,
    queue: Arc<RequestQueue>,
    results: Receiver<WorkerResult>,
    workers: Option<Workers>,

    info: Observable<PlayerCacheInfo>,
    stats: CacheStats,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("playhead", &self.playhead)
            .field("direction", &self.direction)
            .field("window", &self.window)
            .field("generation", &self.generation())
            .field("video", &self.video)
            .field("audio", &self.audio)
            .field("requested", &self.requested.len())
            .field("workers", &self.workers)
            .finish()
    }
}

impl CacheManager {
    /// Create a manager with a background decode pool sized by `options`.
    pub fn new(
        timeline: Arc<dyn Timeline>,
        registry: Arc<ReaderRegistry>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        let threads = options.resolved_worker_count();
        let mut manager = Self::build(timeline, registry, options)?;

        let (tx, rx) = unbounded();
        let workers = Workers::new(
            threads,
            Arc::clone(&manager.queue),
            Arc::clone(&manager.registry),
            manager.read_options.clone(),
            Arc::clone(&manager.generation),
            tx,
        )?;
        manager.results = rx;
        manager.workers = Some(workers);

        info!(
            "CacheManager init: {} workers, read_ahead={}s read_behind={}s, video={} MB, audio={} MB",
            threads,
            manager.options.read_ahead,
            manager.options.read_behind,
            manager.options.video_budget_bytes / 1024 / 1024,
            manager.options.audio_budget_bytes / 1024 / 1024
        );

        manager.rewindow(false);
        Ok(manager)
    }

    /// Create a manager without worker threads.
    ///
    /// Requests queue up until the owner calls `run_pending()`, which decodes
    /// on the calling thread. Deterministic; used by tests and `--sync` runs.
    pub fn without_workers(
        timeline: Arc<dyn Timeline>,
        registry: Arc<ReaderRegistry>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        let mut manager = Self::build(timeline, registry, options)?;
        debug!("CacheManager init: synchronous mode (no workers)");
        manager.rewindow(false);
        Ok(manager)
    }

    fn build(
        timeline: Arc<dyn Timeline>,
        registry: Arc<ReaderRegistry>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        options.validate()?;

        let in_out = timeline.range();
        let read_options = ReadOptions {
            fps: timeline.rate(),
            ..ReadOptions::default()
        };
        // Receiver with no sender until workers are attached
        let (_, results) = unbounded();

        Ok(Self {
            timeline,
            registry,
            video: LruCache::new(options.video_budget_bytes),
            audio: LruCache::new(options.audio_budget_bytes),
            options,
            read_options,
            in_out,
            playhead: in_out.start,
            direction: Direction::Forward,
            looping: false,
            window: FrameRange::single(in_out.start).into(),
            requested: HashMap::new(),
            generation: Arc::new(AtomicU64::new(0)),
            queue: Arc::new(RequestQueue::new()),
            results,
            workers: None,
            info: Observable::default(),
            stats: CacheStats::default(),
        })
    }

    // === Accessors ===

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn playhead(&self) -> FrameIdx {
        self.playhead
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current cache window
    pub fn window(&self) -> &CacheWindow {
        &self.window
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn in_out_range(&self) -> FrameRange {
        self.in_out
    }

    pub fn timeline(&self) -> &Arc<dyn Timeline> {
        &self.timeline
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Shared request queue (workers consume it)
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.as_ref().map_or(0, Workers::len)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Accounted weight of (video, audio) tiers in bytes
    pub fn mem(&self) -> (usize, usize) {
        (self.video.size(), self.audio.size())
    }

    // === Window control ===

    /// Move the playhead and re-center the window.
    ///
    /// Evicts cached keys that fell outside, bumps the generation if any
    /// requested key fell outside, and requests uncached keys inside.
    /// With the window unchanged, only the playhead frame is asked for again
    /// in case the budget evicted it.
    pub fn set_playhead(&mut self, time: FrameIdx) {
        let time = self.in_out.clamp(time);
        if time == self.playhead && !self.window_dirty() {
            let video = self.request_key(Tier::Video, time, 0);
            let audio = self.request_key(Tier::Audio, time, 0);
            if video || audio {
                trace!("Re-requested evicted playhead frame {}", time);
                self.publish_info();
            }
            return;
        }
        self.playhead = time;
        self.rewindow(false);
    }

    /// Jump to `time`: always starts a new generation.
    pub fn seek(&mut self, time: FrameIdx) {
        self.playhead = self.in_out.clamp(time);
        debug!("Seek to {}", self.playhead);
        self.rewindow(true);
    }

    /// Set play direction (reverse flips which side is read-ahead)
    pub fn set_direction(&mut self, direction: Direction) {
        if self.direction != direction {
            self.direction = direction;
            self.rewindow(false);
        }
    }

    /// Wrap the window around the in/out range while playback loops
    pub fn set_looping(&mut self, looping: bool) {
        if self.looping != looping {
            self.looping = looping;
            self.rewindow(false);
        }
    }

    /// Restrict caching (and the playhead) to `range` within the timeline
    pub fn set_in_out_range(&mut self, range: FrameRange) {
        let full = self.timeline.range();
        self.in_out = range.intersect(&full).unwrap_or(full);
        self.playhead = self.in_out.clamp(self.playhead);
        self.rewindow(false);
    }

    /// Apply new options: budgets shrink/grow immediately, window re-centers.
    ///
    /// `worker_count` only takes effect for a new manager.
    pub fn set_options(&mut self, options: CacheOptions) -> Result<(), OptionsError> {
        options.validate()?;
        if options == self.options {
            return Ok(());
        }
        let evicted_v = self.video.set_max(options.video_budget_bytes);
        let evicted_a = self.audio.set_max(options.audio_budget_bytes);
        if !evicted_v.is_empty() || !evicted_a.is_empty() {
            debug!(
                "Budget change evicted {} video / {} audio entries",
                evicted_v.len(),
                evicted_a.len()
            );
        }
        self.options = options;
        self.rewindow(false);
        Ok(())
    }

    /// Drop everything cached or pending and start over at the current playhead
    pub fn clear_cache(&mut self) {
        self.video.clear();
        self.audio.clear();
        self.requested.clear();
        self.queue.clear();
        info!("Cache cleared");
        self.rewindow(true);
    }

    /// Ask for one frame explicitly. Ignored (false) outside the window,
    /// when already cached/requested, or when nothing backs that frame.
    pub fn request(&mut self, tier: Tier, time: FrameIdx) -> bool {
        if !self.window.contains(time) {
            trace!("Request for {} ignored: outside window {}", time, self.window);
            return false;
        }
        let requested = self.request_key(tier, time, 0);
        if requested {
            self.publish_info();
        }
        requested
    }

    // === Queries ===

    /// Non-blocking video lookup; promotes on hit
    pub fn query_video(&mut self, time: FrameIdx) -> Lookup<VideoFrame> {
        let lookup = self.video.get(&time).map(Lookup::from).unwrap_or(Lookup::Miss);
        self.record(&lookup);
        lookup
    }

    /// Non-blocking audio lookup; promotes on hit
    pub fn query_audio(&mut self, time: FrameIdx) -> Lookup<AudioSegment> {
        let lookup = self.audio.get(&time).map(Lookup::from).unwrap_or(Lookup::Miss);
        self.record(&lookup);
        lookup
    }

    /// State of one key, without touching recency
    pub fn key_state(&self, tier: Tier, time: FrameIdx) -> KeyState {
        let cached = match tier {
            Tier::Video => self.video.contains(&time),
            Tier::Audio => self.audio.contains(&time),
        };
        if cached {
            return KeyState::Cached;
        }
        match self.requested.get(&(tier, time)) {
            Some(p) => KeyState::Requested {
                generation: p.generation,
                attempt: p.attempt,
            },
            None => KeyState::Uncached,
        }
    }

    /// Cache info handle; clones observe every update
    pub fn observe_cache_info(&self) -> Observable<PlayerCacheInfo> {
        self.info.clone()
    }

    /// Latest cache info snapshot
    pub fn cache_info(&self) -> PlayerCacheInfo {
        self.info.get()
    }

    /// Deliver deferred observer notifications (call once per tick)
    pub fn flush_observers(&self) -> bool {
        self.info.flush()
    }

    // === Result merging ===

    /// Merge every result the workers have produced so far. Never blocks.
    pub fn process_results(&mut self) -> usize {
        let merged = self.drain_results();
        if merged > 0 {
            self.publish_info();
        }
        merged
    }

    /// Wait up to `timeout` for at least one result, then merge all available.
    ///
    /// For drivers that pre-roll the cache before starting playback; the
    /// playback tick itself should use `process_results()`.
    pub fn wait_results(&mut self, timeout: Duration) -> usize {
        match self.results.recv_timeout(timeout) {
            Ok(first) => {
                self.merge(first);
                let merged = 1 + self.drain_results();
                self.publish_info();
                merged
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn drain_results(&mut self) -> usize {
        let mut merged = 0;
        while let Ok(result) = self.results.try_recv() {
            self.merge(result);
            merged += 1;
        }
        merged
    }

    /// Decode up to `limit` pending requests on the calling thread.
    ///
    /// Works in both modes; in worker mode it competes with the pool.
    pub fn run_pending(&mut self, limit: usize) -> usize {
        let mut done = 0;
        while done < limit {
            let Some(request) = self.queue.dequeue_next() else {
                break;
            };
            if request.generation != self.generation() {
                continue;
            }
            let outcome = workers::decode(&self.registry, &request, &self.read_options);
            self.merge(WorkerResult { request, outcome });
            done += 1;
        }
        if done > 0 {
            self.publish_info();
        }
        done
    }

    /// Merge one worker result and refresh cache info.
    pub fn on_worker_result(&mut self, result: WorkerResult) -> MergeOutcome {
        let outcome = self.merge(result);
        if outcome != MergeOutcome::Stale {
            self.publish_info();
        }
        outcome
    }

    /// Block until the read-ahead side is fully resident or `timeout` passes.
    ///
    /// Returns the final fill percentage.
    pub fn preroll(&mut self, timeout: Duration) -> f64 {
        if self.workers.is_none() {
            self.run_pending(usize::MAX);
            return self.cache_info().percentage;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let pct = self.cache_info().percentage;
            if pct >= 100.0 || self.requested.is_empty() {
                return pct;
            }
            let now = Instant::now();
            if now >= deadline || self.wait_results(deadline - now) == 0 {
                return self.cache_info().percentage;
            }
        }
    }

    fn merge(&mut self, result: WorkerResult) -> MergeOutcome {
        let WorkerResult { request, outcome } = result;
        let key = (request.tier, request.time);

        if request.generation != self.generation() || !self.window.contains(request.time) {
            trace!(
                "Drop stale {:?} frame {} (gen {} vs {})",
                request.tier,
                request.time,
                request.generation,
                self.generation()
            );
            self.stats.stale += 1;
            return MergeOutcome::Stale;
        }

        self.requested.remove(&key);

        match (request.tier, outcome) {
            (Tier::Video, Ok(Decoded::Video(frame))) => {
                let entry = CacheEntry::Ready(Arc::new(frame));
                let weight = entry.weight();
                // The frame on screen is the last one the budget gives up
                self.video.get(&self.playhead);
                let evicted = self.video.add(request.time, entry, weight);
                self.log_insert(&request, weight, evicted.len());
                self.stats.inserted += 1;
                MergeOutcome::Inserted
            }
            (Tier::Audio, Ok(Decoded::Audio(segment))) => {
                let entry = CacheEntry::Ready(Arc::new(segment));
                let weight = entry.weight();
                self.audio.get(&self.playhead);
                let evicted = self.audio.add(request.time, entry, weight);
                self.log_insert(&request, weight, evicted.len());
                self.stats.inserted += 1;
                MergeOutcome::Inserted
            }
            (_, Err(e)) if e.is_transient() && request.attempt == 0 => {
                debug!("Retrying {:?} frame {}: {}", request.tier, request.time, e);
                self.stats.retries += 1;
                self.request_key(request.tier, request.time, 1);
                MergeOutcome::Retried
            }
            (tier, outcome) => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => format!("reader returned wrong payload for {:?}", tier),
                };
                warn!("Frame {} unavailable ({:?}): {}", request.time, tier, reason);
                self.stats.failures += 1;
                self.insert_unavailable(tier, request.time, reason);
                MergeOutcome::Unavailable
            }
        }
    }

    fn insert_unavailable(&mut self, tier: Tier, time: FrameIdx, reason: String) {
        match tier {
            Tier::Video => {
                let entry = CacheEntry::Unavailable { reason };
                let weight = entry.weight();
                self.video.add(time, entry, weight);
            }
            Tier::Audio => {
                let entry = CacheEntry::Unavailable { reason };
                let weight = entry.weight();
                self.audio.add(time, entry, weight);
            }
        }
    }

    fn log_insert(&self, request: &Request, weight: usize, evicted: usize) {
        debug!(
            "Cached {:?} frame {} ({} bytes, gen {}, evicted {})",
            request.tier, request.time, weight, request.generation, evicted
        );
    }

    // === Internals ===

    fn record<T>(&mut self, lookup: &Lookup<T>) {
        if lookup.is_miss() {
            self.stats.misses += 1;
        } else {
            self.stats.hits += 1;
        }
    }

    fn compute_window(&self) -> CacheWindow {
        let rate = self.timeline.rate();
        let ahead = seconds_to_frames(self.options.read_ahead, rate);
        let behind = seconds_to_frames(self.options.read_behind, rate);
        if self.looping {
            CacheWindow::looped(self.playhead, ahead, behind, self.direction, self.in_out)
        } else {
            CacheWindow::clamped(self.playhead, ahead, behind, self.direction, self.in_out)
        }
    }

    fn window_dirty(&self) -> bool {
        self.compute_window() != self.window
    }

    fn rewindow(&mut self, force_bump: bool) {
        self.window = self.compute_window();
        self.queue.set_loop_range(self.looping.then_some(self.in_out));
        self.queue.set_playhead(self.playhead, self.direction);

        let window = &self.window;
        let evicted_v = self.video.remove_where(|t| !window.contains(*t));
        let evicted_a = self.audio.remove_where(|t| !window.contains(*t));
        if !evicted_v.is_empty() || !evicted_a.is_empty() {
            trace!(
                "Window {}: evicted {} video / {} audio",
                window,
                evicted_v.len(),
                evicted_a.len()
            );
        }

        let stranded = self.requested.keys().any(|(_, t)| !self.window.contains(*t));
        if force_bump || stranded {
            self.bump_generation();
        }

        self.request_window();
        self.publish_info();
    }

    /// Start a new generation; carry in-window requests over to it
    fn bump_generation(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let window = &self.window;

        let cancelled = self.queue.cancel_outside_window(window);
        self.queue.restamp(generation);

        // Keys still inside: pending ones were restamped (enqueue dedups),
        // in-flight ones get a fresh request since their result will be stale.
        let keep: Vec<(Tier, FrameIdx, u8)> = self
            .requested
            .iter()
            .filter(|((_, t), _)| window.contains(*t))
            .map(|(&(tier, t), p)| (tier, t, p.attempt))
            .collect();
        let dropped = self.requested.len() - keep.len();
        self.requested.clear();
        for (tier, t, attempt) in keep {
            self.request_key(tier, t, attempt);
        }

        debug!(
            "Generation -> {} (cancelled {} pending, dropped {} requested)",
            generation, cancelled, dropped
        );
    }

    fn request_window(&mut self) {
        let frames: Vec<FrameIdx> = self.window.frames().collect();
        let mut issued = 0;
        for t in frames {
            for tier in [Tier::Video, Tier::Audio] {
                if self.request_key(tier, t, 0) {
                    issued += 1;
                }
            }
        }
        if issued > 0 {
            trace!("Requested {} keys in window {}", issued, self.window);
        }
    }

    /// Enqueue one key if it is uncached, unrequested and resolvable
    fn request_key(&mut self, tier: Tier, time: FrameIdx, attempt: u8) -> bool {
        let cached = match tier {
            Tier::Video => self.video.contains(&time),
            Tier::Audio => self.audio.contains(&time),
        };
        if cached || self.requested.contains_key(&(tier, time)) {
            return false;
        }

        let source = match tier {
            Tier::Video => self.timeline.resolve_video(time),
            Tier::Audio => self.timeline.resolve_audio(time),
        };
        let Some(source) = source else {
            return false;
        };

        let generation = self.generation();
        self.queue.enqueue(Request {
            tier,
            time,
            source,
            priority: Priority::new(time, self.playhead, self.direction),
            generation,
            attempt,
        });
        self.requested.insert((tier, time), Pending { generation, attempt });
        true
    }

    fn publish_info(&self) {
        let ahead = self.window.ahead();
        let total: usize = ahead.iter().map(FrameRange::len).sum();
        let resident = ahead
            .iter()
            .flat_map(|r| r.iter())
            .filter(|t| self.video.contains(t))
            .count();
        let percentage = if total == 0 {
            0.0
        } else {
            resident as f64 / total as f64 * 100.0
        };

        self.info.set(PlayerCacheInfo {
            percentage,
            video_frames: self.video.len(),
            audio_frames: self.audio.len(),
            video_ranges: fold_ranges(self.video.keys()),
            audio_ranges: fold_ranges(self.audio.keys()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::Delivery;
    use crate::entities::{Clip, Composition, MediaReader, ReadError, SourceRef};
    use std::path::Path;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Reader with scripted failures; frames are 2x2 RGBA8 (16 bytes)
    #[derive(Default)]
    struct ScriptedReader {
        transient_once: Mutex<Vec<FrameIdx>>,
        permanent: Vec<FrameIdx>,
    }

    impl MediaReader for ScriptedReader {
        fn read_video(&self, _p: &Path, frame: FrameIdx, _o: &ReadOptions) -> Result<VideoFrame, ReadError> {
            if self.permanent.contains(&frame) {
                return Err(ReadError::Permanent(format!("corrupt {frame}")));
            }
            let mut once = self.transient_once.lock().unwrap();
            if let Some(i) = once.iter().position(|&f| f == frame) {
                once.remove(i);
                return Err(ReadError::Transient("busy".into()));
            }
            Ok(VideoFrame::placeholder(2, 2))
        }

        fn read_audio(&self, _p: &Path, _frame: FrameIdx, o: &ReadOptions) -> Result<AudioSegment, ReadError> {
            Ok(AudioSegment::silence(48, 1, o.fps))
        }
    }

    fn registry(reader: ScriptedReader) -> Arc<ReaderRegistry> {
        let mut registry = ReaderRegistry::new();
        registry.register("test", Arc::new(reader));
        Arc::new(registry)
    }

    /// 0..=99 at 1 fps so seconds == frames
    fn timeline() -> Arc<dyn Timeline> {
        Arc::new(Composition::from_sequence("shot.####.test", 0, 99, 1.0))
    }

    fn options(ahead: f64, behind: f64, video_budget: usize) -> CacheOptions {
        CacheOptions {
            read_ahead: ahead,
            read_behind: behind,
            video_budget_bytes: video_budget,
            audio_budget_bytes: 1 << 20,
            worker_count: 1,
        }
    }

    fn manager(reader: ScriptedReader, opts: CacheOptions) -> CacheManager {
        CacheManager::without_workers(timeline(), registry(reader), opts).unwrap()
    }

    fn result_for(time: FrameIdx, generation: u64) -> WorkerResult {
        WorkerResult {
            request: Request {
                tier: Tier::Video,
                time,
                source: SourceRef {
                    clip: Uuid::nil(),
                    path: format!("shot.{time:04}.test").into(),
                    local_frame: time,
                },
                priority: Priority { distance: 0, behind: false },
                generation,
                attempt: 0,
            },
            outcome: Ok(Decoded::Video(VideoFrame::placeholder(2, 2))),
        }
    }

    #[test]
    fn test_window_around_playhead() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        assert_eq!(*cache.window(), FrameRange::new(8, 15));

        // Outside the window: ignored
        assert!(!cache.request(Tier::Video, 20));
        assert_eq!(cache.key_state(Tier::Video, 20), KeyState::Uncached);

        // Inside: already requested by the window pass
        assert!(matches!(cache.key_state(Tier::Video, 12), KeyState::Requested { .. }));

        cache.set_playhead(18);
        assert!(matches!(cache.key_state(Tier::Video, 20), KeyState::Requested { .. }));
    }

    #[test]
    fn test_window_clamped_and_reversed() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(1);
        assert_eq!(*cache.window(), FrameRange::new(0, 6));

        cache.set_direction(Direction::Reverse);
        cache.set_playhead(50);
        assert_eq!(*cache.window(), FrameRange::new(45, 52));

        cache.set_in_out_range(FrameRange::new(40, 60));
        cache.set_playhead(90);
        assert_eq!(cache.playhead(), 60);
        assert_eq!(*cache.window(), FrameRange::new(55, 60));
    }

    #[test]
    fn test_fill_and_query() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        assert!(cache.query_video(10).is_miss());

        let decoded = cache.run_pending(usize::MAX);
        // 8 video + 0 audio (sequence has no audio track)
        assert_eq!(decoded, 8);
        for t in 8..=15 {
            assert!(cache.query_video(t).is_ready(), "frame {t}");
        }
        let info = cache.cache_info();
        assert_eq!(info.percentage, 100.0);
        assert_eq!(info.video_frames, 8);
        assert_eq!(info.video_ranges, vec![FrameRange::new(8, 15)]);
    }

    #[test]
    fn test_out_of_window_evicted_after_move() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        cache.run_pending(usize::MAX);
        assert!(cache.query_video(8).is_ready());

        cache.set_playhead(30);
        assert!(cache.query_video(8).is_miss());
        assert_eq!(cache.key_state(Tier::Video, 8), KeyState::Uncached);
    }

    #[test]
    fn test_stale_generation_discarded() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        let gen_before = cache.generation();

        // Seek bumps generation even to a nearby frame
        cache.seek(11);
        assert!(cache.generation() > gen_before);

        let outcome = cache.on_worker_result(result_for(12, gen_before));
        assert_eq!(outcome, MergeOutcome::Stale);
        assert!(cache.query_video(12).is_miss());
        assert_eq!(cache.stats().stale, 1);
    }

    #[test]
    fn test_result_from_older_generation_scenario() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(5);
        while cache.generation() < 5 {
            cache.seek(5);
        }
        assert_eq!(cache.generation(), 5);
        assert_eq!(cache.on_worker_result(result_for(7, 3)), MergeOutcome::Stale);
        assert!(cache.query_video(7).is_miss());

        // Current generation merges
        assert_eq!(cache.on_worker_result(result_for(7, 5)), MergeOutcome::Inserted);
        assert!(cache.query_video(7).is_ready());
    }

    #[test]
    fn test_requested_key_leaving_window_bumps_generation() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        let g = cache.generation();

        // Nothing decoded yet, so 8..=15 are all Requested; moving strands some
        cache.set_playhead(40);
        assert_eq!(cache.generation(), g + 1);
        assert_eq!(cache.queue().len(), 8);
        assert!(matches!(
            cache.key_state(Tier::Video, 40),
            KeyState::Requested { generation, .. } if generation == g + 1
        ));
    }

    #[test]
    fn test_forward_step_keeps_generation_when_cached() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);
        cache.run_pending(usize::MAX);
        let g = cache.generation();

        // Back edge is cached, not requested: sliding doesn't invalidate in-flight work
        cache.set_playhead(11);
        assert_eq!(cache.generation(), g);
        assert!(matches!(cache.key_state(Tier::Video, 16), KeyState::Requested { .. }));
    }

    #[test]
    fn test_in_flight_inside_window_rerequested_after_bump() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 2.0, 1 << 20));
        cache.set_playhead(10);

        // Simulate a worker taking frame 10 in flight
        let in_flight = cache.queue().dequeue_next().unwrap();
        assert_eq!(in_flight.time, 10);

        cache.seek(10);
        // The old result is stale...
        let stale = WorkerResult {
            request: in_flight,
            outcome: Ok(Decoded::Video(VideoFrame::placeholder(2, 2))),
        };
        assert_eq!(cache.on_worker_result(stale), MergeOutcome::Stale);
        // ...but the key was re-queued under the new generation
        assert!(cache.queue().contains(Tier::Video, 10, cache.generation()));
        cache.run_pending(usize::MAX);
        assert!(cache.query_video(10).is_ready());
    }

    #[test]
    fn test_transient_retry_then_success() {
        let reader = ScriptedReader {
            transient_once: Mutex::new(vec![10]),
            ..Default::default()
        };
        let mut cache = manager(reader, options(0.0, 0.0, 1 << 20));
        cache.set_playhead(10);
        cache.run_pending(usize::MAX);

        assert!(cache.query_video(10).is_ready());
        assert_eq!(cache.stats().retries, 1);
    }

    #[test]
    fn test_transient_twice_becomes_unavailable() {
        let reader = ScriptedReader {
            transient_once: Mutex::new(vec![10, 10]),
            ..Default::default()
        };
        let mut cache = manager(reader, options(0.0, 0.0, 1 << 20));
        cache.set_playhead(10);
        cache.run_pending(usize::MAX);

        assert!(matches!(cache.query_video(10), Lookup::Unavailable));
        assert_eq!(cache.stats().retries, 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_permanent_failure_sentinel_not_rerequested() {
        let reader = ScriptedReader {
            permanent: vec![11],
            ..Default::default()
        };
        let mut cache = manager(reader, options(2.0, 0.0, 1 << 20));
        cache.set_playhead(10);
        cache.run_pending(usize::MAX);

        assert!(matches!(cache.query_video(11), Lookup::Unavailable));
        assert_eq!(cache.key_state(Tier::Video, 11), KeyState::Cached);

        // Re-centering on the same window doesn't ask again
        cache.set_playhead(11);
        assert!(!cache.queue().contains(Tier::Video, 11, cache.generation()));

        // Leaving the window forgets the failure
        cache.set_playhead(50);
        cache.set_playhead(11);
        assert!(matches!(cache.key_state(Tier::Video, 11), KeyState::Requested { .. }));
    }

    #[test]
    fn test_budget_limits_resident_frames() {
        // 16-byte frames, 40-byte budget: at most two frames resident
        let mut cache = manager(ScriptedReader::default(), options(5.0, 0.0, 40));
        cache.set_playhead(0);
        cache.run_pending(usize::MAX);

        let (video, _) = cache.mem();
        assert!(video <= 40);
        assert_eq!(cache.cache_info().video_frames, 2);
    }

    #[test]
    fn test_budget_keeps_playhead_frame() {
        // Room for two 16-byte frames, window of six
        let mut cache = manager(ScriptedReader::default(), options(5.0, 0.0, 40));
        cache.set_playhead(0);
        cache.run_pending(usize::MAX);

        assert_eq!(cache.key_state(Tier::Video, 0), KeyState::Cached);
        assert_eq!(cache.key_state(Tier::Video, 5), KeyState::Cached);
        assert_eq!(cache.cache_info().video_ranges, vec![FrameRange::single(0), FrameRange::single(5)]);
    }

    #[test]
    fn test_evicted_playhead_frame_requested_again() {
        // Room for one frame: later frames push the playhead frame out
        let mut cache = manager(ScriptedReader::default(), options(5.0, 0.0, 20));
        cache.set_playhead(0);
        cache.run_pending(usize::MAX);
        assert_eq!(cache.key_state(Tier::Video, 0), KeyState::Uncached);
        assert!(cache.queue().is_empty());

        // Same frame, same window: still asks for the frame on screen
        let g = cache.generation();
        cache.set_playhead(0);
        assert!(matches!(cache.key_state(Tier::Video, 0), KeyState::Requested { .. }));
        assert_eq!(cache.queue().len(), 1);
        assert_eq!(cache.generation(), g);

        cache.run_pending(usize::MAX);
        assert!(cache.query_video(0).is_ready());
    }

    #[test]
    fn test_huge_read_ahead_saturates() {
        let mut cache = manager(ScriptedReader::default(), options(1e300, 2.0, 1 << 20));
        cache.set_playhead(5);
        assert_eq!(*cache.window(), FrameRange::new(3, 99));

        cache.set_direction(Direction::Reverse);
        assert_eq!(*cache.window(), FrameRange::new(0, 7));

        cache.set_looping(true);
        assert_eq!(*cache.window(), FrameRange::new(0, 99));
    }

    #[test]
    fn test_looping_window_caches_in_point_before_wrap() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 0.0, 1 << 20));
        cache.set_looping(true);
        cache.set_playhead(97);
        assert_eq!(cache.window().ranges(), &[FrameRange::new(0, 2), FrameRange::new(97, 99)]);

        cache.run_pending(usize::MAX);
        assert_eq!(cache.cache_info().percentage, 100.0);
        assert!(cache.query_video(0).is_ready());

        // Wrapping to the in point keeps the frames and the generation
        let g = cache.generation();
        cache.set_playhead(0);
        assert_eq!(cache.generation(), g);
        assert_eq!(cache.key_state(Tier::Video, 0), KeyState::Cached);
        assert_eq!(cache.key_state(Tier::Video, 2), KeyState::Cached);
        assert!(matches!(cache.key_state(Tier::Video, 5), KeyState::Requested { .. }));

        // Clamped again once looping stops
        cache.set_looping(false);
        cache.set_playhead(97);
        assert_eq!(*cache.window(), FrameRange::new(97, 99));
    }

    #[test]
    fn test_set_options_shrinks_budget() {
        let mut cache = manager(ScriptedReader::default(), options(5.0, 0.0, 1 << 20));
        cache.set_playhead(0);
        cache.run_pending(usize::MAX);
        assert_eq!(cache.cache_info().video_frames, 6);

        cache.set_options(options(5.0, 0.0, 48)).unwrap();
        assert_eq!(cache.mem().0, 48);

        let bad = CacheOptions {
            read_ahead: f64::NAN,
            ..options(5.0, 0.0, 48)
        };
        assert!(cache.set_options(bad).is_err());
    }

    #[test]
    fn test_clear_cache() {
        let mut cache = manager(ScriptedReader::default(), options(3.0, 0.0, 1 << 20));
        cache.set_playhead(0);
        cache.run_pending(usize::MAX);
        let g = cache.generation();

        cache.clear_cache();
        assert!(cache.generation() > g);
        assert!(cache.query_video(0).is_miss());
        assert!(matches!(cache.key_state(Tier::Video, 0), KeyState::Requested { .. }));
    }

    #[test]
    fn test_audio_tier() {
        let mut comp = Composition::new(1.0);
        comp.add_clip(Clip::new("a.####.test", 0, 0, 50).with_audio("a.test"));
        let mut cache = CacheManager::without_workers(
            Arc::new(comp),
            registry(ScriptedReader::default()),
            options(2.0, 0.0, 1 << 20),
        )
        .unwrap();
        cache.set_playhead(0);
        assert_eq!(cache.run_pending(usize::MAX), 6);

        assert!(cache.query_audio(1).is_ready());
        let info = cache.cache_info();
        assert_eq!(info.audio_frames, 3);
        assert_eq!(info.audio_ranges, vec![FrameRange::new(0, 2)]);
    }

    #[test]
    fn test_info_observer_deferred() {
        let mut cache = manager(ScriptedReader::default(), options(3.0, 0.0, 1 << 20));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        cache
            .observe_cache_info()
            .subscribe(Delivery::Deferred, move |info: &PlayerCacheInfo| {
                s.lock().unwrap().push(info.video_frames);
            });

        cache.set_playhead(0);
        cache.run_pending(usize::MAX);
        assert!(seen.lock().unwrap().is_empty());

        assert!(cache.flush_observers());
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_hit_promotes_within_tier() {
        // Budget for three 16-byte frames, window of four
        let mut cache = manager(ScriptedReader::default(), options(3.0, 0.0, 48));
        cache.set_playhead(0);
        // Decode 0, 1, 2 only
        cache.run_pending(3);
        assert!(cache.query_video(0).is_ready());

        // Frame 3 arrives: LRU is 1 (0 was just read)
        cache.run_pending(1);
        assert!(cache.query_video(0).is_ready());
        assert!(cache.query_video(1).is_miss());
    }
}
