//! Format readers: the long-latency decode backend behind the worker pool.
//!
//! Readers are looked up in an explicit `ReaderRegistry` keyed by file
//! extension. Workers call them synchronously; latency may be anything from
//! microseconds (synthetic) to seconds (network EXR).
//!
//! Backends:
//! - `ImageReader`: `image` crate (PNG, JPEG, TIFF, TGA, EXR, HDR)
//! - `SyntheticReader`: procedural test pattern + tone, extension `synth`

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;

use super::frame::{AudioSegment, VideoFrame};
use super::time::FrameIdx;

/// Reader failure, classified for retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// Worth one retry (network hiccup, lock, interrupted read)
    #[error("transient read error: {0}")]
    Transient(String),
    /// Corrupt or missing data; retrying won't help
    #[error("decode failed: {0}")]
    Permanent(String),
    /// No reader for this format / tier
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ReadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ReadError::Transient(_))
    }

    fn from_io(err: &std::io::Error, path: &Path) -> Self {
        let msg = format!("{}: {}", path.display(), err);
        match err.kind() {
            ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => ReadError::Transient(msg),
            _ => ReadError::Permanent(msg),
        }
    }
}

/// Per-read parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// Timeline rate, used to size audio segments
    pub fps: f64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            fps: 24.0,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }
}

/// Decode backend
pub trait MediaReader: Send + Sync {
    /// Decode one video frame
    fn read_video(&self, path: &Path, frame: FrameIdx, options: &ReadOptions) -> Result<VideoFrame, ReadError>;

    /// Decode audio covering one frame duration
    fn read_audio(&self, path: &Path, frame: FrameIdx, options: &ReadOptions) -> Result<AudioSegment, ReadError> {
        let _ = (frame, options);
        Err(ReadError::Unsupported(format!("no audio in {}", path.display())))
    }
}

impl<T: MediaReader + ?Sized> MediaReader for Arc<T> {
    fn read_video(&self, path: &Path, frame: FrameIdx, options: &ReadOptions) -> Result<VideoFrame, ReadError> {
        (**self).read_video(path, frame, options)
    }

    fn read_audio(&self, path: &Path, frame: FrameIdx, options: &ReadOptions) -> Result<AudioSegment, ReadError> {
        (**self).read_audio(path, frame, options)
    }
}

/// Reader table keyed by lowercase extension (no leading dot)
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    readers: HashMap<String, Arc<dyn MediaReader>>,
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut exts: Vec<&String> = self.readers.keys().collect();
        exts.sort();
        f.debug_struct("ReaderRegistry").field("extensions", &exts).finish()
    }
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in image and synthetic readers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let image: Arc<dyn MediaReader> = Arc::new(ImageReader);
        for ext in ["png", "jpg", "jpeg", "tif", "tiff", "tga", "exr", "hdr"] {
            registry.register(ext, Arc::clone(&image));
        }
        registry.register("synth", Arc::new(SyntheticReader::default()));
        registry
    }

    /// Register (or replace) the reader for an extension
    pub fn register(&mut self, ext: &str, reader: Arc<dyn MediaReader>) {
        let key = ext.trim_start_matches('.').to_lowercase();
        trace!("ReaderRegistry: registered .{}", key);
        self.readers.insert(key, reader);
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.reader_for(path).is_ok()
    }

    /// Look up the reader for a path's extension
    pub fn reader_for(&self, path: &Path) -> Result<Arc<dyn MediaReader>, ReadError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        self.readers
            .get(&ext)
            .cloned()
            .ok_or_else(|| ReadError::Unsupported(format!(".{}", ext)))
    }
}

/// Still-image reader built on the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageReader;

impl MediaReader for ImageReader {
    fn read_video(&self, path: &Path, _frame: FrameIdx, _options: &ReadOptions) -> Result<VideoFrame, ReadError> {
        debug!("Loading image: {}", path.display());

        let img = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(io) => ReadError::from_io(&io, path),
            image::ImageError::Unsupported(u) => ReadError::Unsupported(u.to_string()),
            other => ReadError::Permanent(format!("{}: {}", path.display(), other)),
        })?;

        let width = img.width() as usize;
        let height = img.height() as usize;

        // HDR sources keep float precision, everything else goes to RGBA8
        let frame = match img.color() {
            image::ColorType::Rgb32F | image::ColorType::Rgba32F => {
                VideoFrame::from_f32_buffer(img.to_rgba32f().into_raw(), width, height)
            }
            _ => VideoFrame::from_u8_buffer(img.to_rgba8().into_raw(), width, height),
        };

        debug!("Loaded {}: {}x{} ({:?})", path.display(), width, height, frame.pixel_format);
        Ok(frame)
    }
}

/// Procedural source for demos and soak tests.
///
/// Video is a horizontal gradient whose brightness follows the frame
/// number; audio is a 440 Hz tone. `latency` simulates decode cost.
#[derive(Debug, Clone)]
pub struct SyntheticReader {
    pub width: usize,
    pub height: usize,
    pub latency: Duration,
}

impl Default for SyntheticReader {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            latency: Duration::ZERO,
        }
    }
}

impl SyntheticReader {
    pub fn new(width: usize, height: usize, latency: Duration) -> Self {
        Self { width, height, latency }
    }
}

impl MediaReader for SyntheticReader {
    fn read_video(&self, _path: &Path, frame: FrameIdx, _options: &ReadOptions) -> Result<VideoFrame, ReadError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let level = frame.rem_euclid(256) as u8;
        let mut buffer = vec![0u8; self.width * self.height * 4];
        for (i, px) in buffer.chunks_mut(4).enumerate() {
            let x = i % self.width.max(1);
            let ramp = ((x * 255) / self.width.max(1)) as u8;
            px.copy_from_slice(&[ramp, level, 255 - ramp, 255]);
        }
        Ok(VideoFrame::from_u8_buffer(buffer, self.width, self.height))
    }

    fn read_audio(&self, _path: &Path, frame: FrameIdx, options: &ReadOptions) -> Result<AudioSegment, ReadError> {
        let mut seg = AudioSegment::silence(options.audio_sample_rate, options.audio_channels, options.fps);
        let per_channel = seg.frames();
        let channels = options.audio_channels.max(1) as usize;
        let offset = frame as f64 * per_channel as f64;
        for (i, chunk) in seg.samples.chunks_mut(channels).enumerate() {
            let t = (offset + i as f64) / options.audio_sample_rate.max(1) as f64;
            let v = (t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.25;
            chunk.fill(v);
        }
        Ok(seg)
    }
}
