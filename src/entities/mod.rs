//! Entities module - data types and collaborator seams used by the cache
//!
//! - `time`: frame indices, ranges, play direction
//! - `frame`: decoded video/audio payloads and cache entries
//! - `timeline`: composition model that maps timeline frames to sources
//! - `reader`: format readers and the extension-keyed registry

pub mod frame;
pub mod reader;
pub mod time;
pub mod timeline;

pub use frame::{AudioSegment, CacheEntry, Lookup, PixelBuffer, PixelFormat, VideoFrame, Weighted};
pub use reader::{ImageReader, MediaReader, ReadError, ReadOptions, ReaderRegistry, SyntheticReader};
pub use time::{CacheWindow, Direction, FrameIdx, FrameRange};
pub use timeline::{Clip, Composition, SourceRef, Timeline};
