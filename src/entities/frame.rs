//! Decoded units held by the cache: video frames and audio segments.
//!
//! **Why**: The cache only needs to know how much memory an entry costs;
//! rendering and audio output consume the payloads read-only.
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: LDR images (JPG/PNG), 4 bytes/pixel
//! - `PixelBuffer::F16`: EXR HALF, 8 bytes/pixel
//! - `PixelBuffer::F32`: EXR FLOAT / HDR, 16 bytes/pixel
//!
//! # Sharing
//!
//! Entries are handed out as `Arc<T>`. Eviction drops the cache's reference
//! only; a consumer holding a frame keeps it alive until it lets go.

use half::f16 as F16;
use std::sync::Arc;

/// Pixel buffer format - stores different precision levels
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    F16(Vec<F16>),
    F32(Vec<f32>),
}

impl PixelBuffer {
    /// Size in bytes
    pub fn mem(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len() * std::mem::size_of::<F16>(),
            PixelBuffer::F32(v) => v.len() * std::mem::size_of::<f32>(),
        }
    }
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    RgbaF16,
    RgbaF32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaF16 => 8,
            PixelFormat::RgbaF32 => 16,
        }
    }
}

/// Anything the cache stores must report its memory cost
pub trait Weighted {
    fn mem(&self) -> usize;
}

/// Decoded RGBA image
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
    pub buffer: PixelBuffer,
}

impl VideoFrame {
    /// Wrap an 8-bit RGBA buffer
    pub fn from_u8_buffer(buffer: Vec<u8>, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Rgba8,
            buffer: PixelBuffer::U8(buffer),
        }
    }

    /// Wrap a 32-bit float RGBA buffer
    pub fn from_f32_buffer(buffer: Vec<f32>, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::RgbaF32,
            buffer: PixelBuffer::F32(buffer),
        }
    }

    /// Wrap a half-float RGBA buffer
    pub fn from_f16_buffer(buffer: Vec<F16>, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::RgbaF16,
            buffer: PixelBuffer::F16(buffer),
        }
    }

    /// Dark green placeholder shown while a frame is missing
    pub fn placeholder(width: usize, height: usize) -> Self {
        let mut buffer = vec![0u8; width * height * 4];
        for px in buffer.chunks_mut(4) {
            px.copy_from_slice(&[0, 100, 0, 255]);
        }
        Self::from_u8_buffer(buffer, width, height)
    }
}

impl Weighted for VideoFrame {
    fn mem(&self) -> usize {
        self.buffer.mem()
    }
}

/// Decoded audio covering one frame duration, interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioSegment {
    /// Silence long enough to cover one frame at `fps`
    pub fn silence(sample_rate: u32, channels: u16, fps: f64) -> Self {
        let per_channel = if fps > 0.0 {
            (sample_rate as f64 / fps).ceil() as usize
        } else {
            0
        };
        Self {
            sample_rate,
            channels,
            samples: vec![0.0; per_channel * channels as usize],
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

impl Weighted for AudioSegment {
    fn mem(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// Weight charged for an "unavailable" sentinel
pub const UNAVAILABLE_WEIGHT: usize = 64;

/// What the cache stores per key
#[derive(Debug, Clone)]
pub enum CacheEntry<T> {
    /// Decoded payload, shared with consumers
    Ready(Arc<T>),
    /// Decode permanently failed for this key during current window residency
    Unavailable { reason: String },
}

impl<T: Weighted> CacheEntry<T> {
    /// Weight used for budget accounting
    pub fn weight(&self) -> usize {
        match self {
            CacheEntry::Ready(v) => v.mem(),
            CacheEntry::Unavailable { .. } => UNAVAILABLE_WEIGHT,
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheEntry::Ready(_))
    }
}

/// Result of a non-blocking cache query
#[derive(Debug, Clone)]
pub enum Lookup<T> {
    /// Frame is resident
    Ready(Arc<T>),
    /// Frame is known-bad; don't wait for it
    Unavailable,
    /// Not resident (may be requested or in flight)
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Payload if ready
    pub fn ready(self) -> Option<Arc<T>> {
        match self {
            Lookup::Ready(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<&CacheEntry<T>> for Lookup<T> {
    fn from(entry: &CacheEntry<T>) -> Self {
        match entry {
            CacheEntry::Ready(v) => Lookup::Ready(Arc::clone(v)),
            CacheEntry::Unavailable { .. } => Lookup::Unavailable,
        }
    }
}
