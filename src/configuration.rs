//! Repository, registry, and frame output configuration.
//!
//! Options are plain builder structs threaded through constructors so that
//! operational settings never leak into every method signature.
//!
//! # Example
//!
//! ```
//! use seekframe::{InitFailurePolicy, RegistryOptions, RepositoryOptions};
//!
//! let options = RegistryOptions::new()
//!     .with_failure_policy(InitFailurePolicy::Cache)
//!     .with_repository_options(RepositoryOptions::new().with_stream_capacity(32));
//!
//! assert_eq!(options.failure_policy(), InitFailurePolicy::Cache);
//! assert_eq!(options.repository_options().stream_capacity(), 32);
//! ```

#[cfg(feature = "ffmpeg")]
use ffmpeg_next::format::Pixel;

use crate::stream::DEFAULT_STREAM_CAPACITY;

/// What a [`RepositoryRegistry`](crate::RepositoryRegistry) does with an
/// initialization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitFailurePolicy {
    /// Forget the failed initialization so the next request loads again.
    /// This is the default.
    #[default]
    Evict,
    /// Keep the failure; every later request for the same key returns it.
    Cache,
}

/// Settings for a single [`ImageRepository`](crate::ImageRepository).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    stream_capacity: usize,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryOptions {
    /// Default settings: frame streams buffer 8 events.
    pub fn new() -> Self {
        Self {
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Set how many events a [`FrameEventStream`](crate::FrameEventStream)
    /// buffers before dropping new frames. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Event buffer size for frame streams.
    pub fn stream_capacity(&self) -> usize {
        self.stream_capacity
    }
}

/// Settings for a [`RepositoryRegistry`](crate::RepositoryRegistry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    failure_policy: InitFailurePolicy,
    repository: RepositoryOptions,
}

impl RegistryOptions {
    /// Default settings: failed initializations are evicted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose what happens to failed initializations.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: InitFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Options applied to every repository the registry creates.
    #[must_use]
    pub fn with_repository_options(mut self, options: RepositoryOptions) -> Self {
        self.repository = options;
        self
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> InitFailurePolicy {
        self.failure_policy
    }

    /// The options given to created repositories.
    pub fn repository_options(&self) -> &RepositoryOptions {
        &self.repository
    }
}

/// Output pixel format for decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bpp). This is the default.
    #[default]
    Rgb8,
    /// 8-bit RGBA with alpha pre-set to 255 (32 bpp).
    Rgba8,
    /// 8-bit grayscale (8 bpp).
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel in a tightly-packed buffer of this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Map to the corresponding FFmpeg pixel format constant.
    #[cfg(feature = "ffmpeg")]
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }
}

/// Pixel format and resolution of frames rendered by a decoding source.
///
/// When no dimensions are set the source resolution is used. Setting one
/// dimension with `maintain_aspect_ratio` computes the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutputOptions {
    /// Output pixel format.
    pub pixel_format: PixelFormat,
    /// Target width. `None` keeps the source width.
    pub width: Option<u32>,
    /// Target height. `None` keeps the source height.
    pub height: Option<u32>,
    /// When `true` and only one dimension is specified, the other is
    /// computed to preserve the source aspect ratio.
    pub maintain_aspect_ratio: bool,
}

impl Default for FrameOutputOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
        }
    }
}

impl FrameOutputOptions {
    /// Source resolution, RGB8.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output pixel format.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the output resolution. `None` keeps the source value.
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Control aspect-ratio preservation when only one dimension is set.
    #[must_use]
    pub fn with_maintain_aspect_ratio(mut self, maintain: bool) -> Self {
        self.maintain_aspect_ratio = maintain;
        self
    }

    /// Resolve the final output dimensions given the source size.
    ///
    /// Returns `(width, height)`.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if self.maintain_aspect_ratio && source_width > 0 => {
                let ratio = w as f64 / source_width as f64;
                let h = (source_height as f64 * ratio).round() as u32;
                (w, h.max(1))
            }
            (Some(w), None) => (w, source_height),
            (None, Some(h)) if self.maintain_aspect_ratio && source_height > 0 => {
                let ratio = h as f64 / source_height as f64;
                let w = (source_width as f64 * ratio).round() as u32;
                (w.max(1), h)
            }
            (None, Some(h)) => (source_width, h),
            (None, None) => (source_width, source_height),
        }
    }
}
