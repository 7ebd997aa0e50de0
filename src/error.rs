//! Error types for the `seekframe` crate.
//!
//! This module defines [`SeekframeError`], the unified error type returned by
//! all fallible operations in the crate. The variants fall into three groups:
//! lifecycle misuse (`NotInitialized`), playback-mode conflicts
//! (`AlreadyPlaying`, `NotPlaying`, `SeekInProgress`) and task-queue
//! outcomes (`QueueStopped`, `TaskCleared`, `TaskPanicked`).

use thiserror::Error;

/// The unified error type for all `seekframe` operations.
///
/// Every public method that can fail returns `Result<T, SeekframeError>`.
/// The type is [`Clone`] so that a single failure can be shared by every
/// caller waiting on the same in-flight initialization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SeekframeError {
    /// The repository has not been initialized, or has been torn down.
    #[error("Image repository is not initialized")]
    NotInitialized,

    /// A seek or a second `play` was requested while playback is running.
    #[error("Image repository is already playing")]
    AlreadyPlaying,

    /// `pause` or `stop` was requested while playback is not running.
    #[error("Image repository is not playing")]
    NotPlaying,

    /// `play` was requested while seek requests are still queued.
    #[error("Cannot start playback while a seek is in progress")]
    SeekInProgress,

    /// The task queue has been permanently stopped.
    #[error("Queue has been stopped")]
    QueueStopped,

    /// A pending task was discarded by [`SerialTaskQueue::clear`](crate::SerialTaskQueue::clear).
    #[error("Task cleared: {reason}")]
    TaskCleared {
        /// Reason passed to `clear`.
        reason: String,
    },

    /// A queued task panicked while running.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The frame source dropped a one-shot frame callback without firing it.
    #[error("Frame callback was dropped before a frame was rendered")]
    FrameCallbackDropped,

    /// The resource loader failed to produce a frame source.
    #[error("Failed to load video source {key}: {reason}")]
    SourceLoadFailed {
        /// Normalized resource key that was being loaded.
        key: String,
        /// Underlying reason the load failed.
        reason: String,
    },

    /// The frame source refused to start or pause playback.
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// The video resource does not contain a video stream.
    #[cfg(feature = "ffmpeg")]
    #[error("No video stream found in file")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[cfg(feature = "ffmpeg")]
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl SeekframeError {
    /// Returns `true` if the error is terminal for the repository instance
    /// that produced it, meaning a retry on the same instance cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SeekframeError::QueueStopped | SeekframeError::NotInitialized)
    }

    /// Returns `true` if the error signals a caller-side sequencing mistake
    /// (an operation that is illegal in the current playback mode).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SeekframeError::AlreadyPlaying
                | SeekframeError::NotPlaying
                | SeekframeError::SeekInProgress
        )
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for SeekframeError {
    fn from(error: ffmpeg_next::Error) -> Self {
        SeekframeError::FfmpegError(error.to_string())
    }
}
