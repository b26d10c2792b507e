//! tlcache - timeline playback cache
//!
//! Keeps decoded video frames and audio around a moving playhead so a
//! player can show frame N the moment its clock says so. Decoding runs on
//! a background pool; the cache window follows the playhead and a
//! generation counter throws away work made obsolete by seeks.

// Core engine (cache, queue, workers, player)
pub mod core;

pub mod cli;
pub mod entities;
pub mod paths;

// Re-export commonly used types from core
pub use core::cache_man::{CacheManager, PlayerCacheInfo};
pub use core::options::CacheOptions;
pub use core::player::Player;

// Re-export entities
pub use entities::{Composition, Direction, FrameIdx, FrameRange, Lookup, ReaderRegistry, Timeline, VideoFrame};
