//! # seekframe
//!
//! Frame-accurate image access for video resources.
//!
//! `seekframe` puts a small, serialized control surface in front of a
//! playable frame source. It answers two kinds of requests:
//!
//! - **Seeks**: "give me the image at timestamp *t*". Concurrent requests are
//!   funnelled through a [`SerialTaskQueue`] so each caller receives the
//!   frame rendered for its own timestamp, in call order.
//! - **Playback**: continuous play/pause/stop, publishing a
//!   [`FrameReadyEvent`] for every rendered frame.
//!
//! Seeking and playback are mutually exclusive; a [`PlaybackMode`] state
//! machine arbitrates between them. Repositories are shared per resource
//! through a [`RepositoryRegistry`].
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # async fn example() -> Result<(), seekframe::SeekframeError> {
//! let repository = seekframe::get_repository("input.mp4").await?;
//!
//! // Three concurrent seeks, resolved in call order.
//! let requests = [5_000_000, 1_000_000, 3_000_000].map(|t| repository.get_image(t));
//! for request in requests {
//!     let event = request.await?;
//!     println!("frame at {} us", event.timestamp_us);
//! }
//!
//! // The rendered frame itself.
//! let image = repository.source()?.current_image();
//! # let _ = image;
//!
//! // Continuous playback.
//! let subscription = repository.on(|event| println!("playing {} us", event.timestamp_us));
//! repository.play().await?;
//! repository.stop().await?;
//! subscription.off();
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom frame sources
//!
//! Anything that can seek, play, and report rendered frames can back a
//! repository: implement [`FrameSource`] and [`SourceLoader`] and build a
//! [`RepositoryRegistry`] around the loader. [`FrameCallbacks`] covers the
//! one-shot callback bookkeeping.
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | [`FfmpegLoader`] / [`FfmpegFrameSource`] decoding video files, the global [`get_repository`], and the `seekframe-cli` binary |
//! | `full` | Enables all of the above |
//!
//! FFmpeg development libraries must be installed to build the `ffmpeg`
//! feature.

pub mod configuration;
pub mod conversion;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod error;
pub mod events;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod playback;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod source;
pub mod stream;
#[cfg(feature = "ffmpeg")]
mod utilities;

pub use configuration::{
    FrameOutputOptions, InitFailurePolicy, PixelFormat, RegistryOptions, RepositoryOptions,
};
pub use conversion::{microseconds_to_seconds, seconds_to_microseconds};
#[cfg(feature = "ffmpeg")]
pub use decoder::{FfmpegFrameSource, FfmpegLoader, VideoInfo};
pub use error::SeekframeError;
pub use events::{EventEmitter, EventSubscription};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use playback::PlaybackMode;
pub use queue::{QueuedTask, SerialTaskQueue};
#[cfg(feature = "ffmpeg")]
pub use registry::get_repository;
pub use registry::{RepositoryRegistry, normalize_key};
pub use repository::ImageRepository;
pub use source::{
    CallbackId, FrameCallback, FrameCallbacks, FrameMetadata, FrameReadyEvent, FrameSource,
    SourceLoader,
};
pub use stream::FrameEventStream;
