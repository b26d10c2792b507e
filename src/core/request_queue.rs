//! Pending decode requests shared by the cache manager and the workers
//!
//! **Why**: Window recompute re-requests the same frames over and over; the
//! queue deduplicates by (tier, time, generation) and always hands out the
//! frame closest to the playhead first.
//!
//! Ordering: distance from playhead ascending, read-ahead side before
//! read-behind side, video before audio, then insertion order.
//!
//! Only pending requests live here. Once a worker dequeues a request it is
//! "in flight" and can no longer be cancelled; its result gets filtered by
//! generation at merge time instead.

use std::sync::{Condvar, Mutex};

use indexmap::IndexMap;
use log::trace;

use crate::entities::{CacheWindow, Direction, FrameIdx, FrameRange, SourceRef};

/// Cache tier a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Video,
    Audio,
}

/// Scheduling rank, smaller is more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    /// Frames between request and playhead
    pub distance: u64,
    /// True if the frame is on the read-behind side
    pub behind: bool,
}

impl Priority {
    pub fn new(time: FrameIdx, playhead: FrameIdx, direction: Direction) -> Self {
        Self {
            distance: time.abs_diff(playhead),
            behind: !direction.is_ahead(playhead, time),
        }
    }

    /// Rank by steps around a looping `range`, so frames just past the
    /// out point count as close ahead of a playhead near it.
    pub fn looped(time: FrameIdx, playhead: FrameIdx, direction: Direction, range: FrameRange) -> Self {
        let len = range.len() as i64;
        if len == 0 || !range.contains(time) || !range.contains(playhead) {
            return Self::new(time, playhead, direction);
        }
        let ahead = ((time - playhead) * direction.sign()).rem_euclid(len);
        let behind = (len - ahead) % len;
        if ahead <= behind {
            Self { distance: ahead as u64, behind: false }
        } else {
            Self { distance: behind as u64, behind: true }
        }
    }
}

/// One decode request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub tier: Tier,
    /// Timeline frame (cache key)
    pub time: FrameIdx,
    /// Resolved source to hand to the reader
    pub source: SourceRef,
    pub priority: Priority,
    /// Generation active when the request was created
    pub generation: u64,
    /// 0 on first try, 1 on retry
    pub attempt: u8,
}

type PendingKey = (Tier, FrameIdx, u64);

#[derive(Debug, Default)]
struct QueueState {
    pending: IndexMap<PendingKey, Request>,
    playhead: FrameIdx,
    direction: Direction,
    /// Set while playback loops over this range
    loop_range: Option<FrameRange>,
    shutdown: bool,
}

impl QueueState {
    fn rank(&self, time: FrameIdx) -> Priority {
        match self.loop_range {
            Some(range) => Priority::looped(time, self.playhead, self.direction, range),
            None => Priority::new(time, self.playhead, self.direction),
        }
    }

    fn rerank(&mut self) {
        let ranks: Vec<Priority> = self.pending.values().map(|r| self.rank(r.time)).collect();
        for (request, priority) in self.pending.values_mut().zip(ranks) {
            request.priority = priority;
        }
    }

    fn take_next(&mut self) -> Option<Request> {
        let idx = self
            .pending
            .values()
            .enumerate()
            .min_by_key(|(_, r)| (r.priority, r.tier))
            .map(|(i, _)| i)?;
        self.pending.shift_remove_index(idx).map(|(_, r)| r)
    }
}

/// Thread-safe priority queue with blocking dequeue
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request unless an identical (tier, time, generation) one is pending.
    ///
    /// Priority is recomputed against the queue's current playhead.
    /// Returns false if deduplicated or the queue is shut down.
    pub fn enqueue(&self, mut request: Request) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.shutdown {
            return false;
        }
        let key = (request.tier, request.time, request.generation);
        if state.pending.contains_key(&key) {
            return false;
        }
        request.priority = state.rank(request.time);
        state.pending.insert(key, request);
        drop(state);

        self.available.notify_one();
        true
    }

    /// Pop the most urgent request without waiting
    pub fn dequeue_next(&self) -> Option<Request> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.take_next()
    }

    /// Pop the most urgent request, parking until one arrives.
    ///
    /// Returns None once the queue is shut down.
    pub fn dequeue_blocking(&self) -> Option<Request> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(request) = state.take_next() {
                return Some(request);
            }
            state = self.available.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Re-rank pending requests around a new playhead
    pub fn set_playhead(&self, playhead: FrameIdx, direction: Direction) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playhead = playhead;
        state.direction = direction;
        state.rerank();
    }

    /// Rank around a loop (`Some`) or by plain distance (`None`)
    pub fn set_loop_range(&self, range: Option<FrameRange>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.loop_range != range {
            state.loop_range = range;
            state.rerank();
        }
    }

    /// Drop pending requests outside `window`. Dispatched ones are untouched.
    pub fn cancel_outside_window(&self, window: &CacheWindow) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.pending.len();
        state.pending.retain(|_, r| window.contains(r.time));
        let cancelled = before - state.pending.len();
        if cancelled > 0 {
            trace!("RequestQueue: cancelled {} pending outside {}", cancelled, window);
        }
        cancelled
    }

    /// Move every pending request to `generation`, keeping order
    pub fn restamp(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let old = std::mem::take(&mut state.pending);
        for (_, mut request) in old {
            request.generation = generation;
            let key = (request.tier, request.time, generation);
            state.pending.entry(key).or_insert(request);
        }
    }

    /// Is an identical request pending?
    pub fn contains(&self, tier: Tier, time: FrameIdx, generation: u64) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.contains_key(&(tier, time, generation))
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all pending requests
    pub fn clear(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pending.clear();
    }

    /// Wake all waiters and refuse further work
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.shutdown = true;
        state.pending.clear();
        drop(state);
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).shutdown
    }
}
