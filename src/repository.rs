//! Core [`ImageRepository`] implementation.
//!
//! An `ImageRepository` gives frame-accurate access to the images stored in
//! one video resource. Seeks ([`get_image`](ImageRepository::get_image)) run
//! through a [`SerialTaskQueue`] so every caller receives the frame for its
//! own timestamp, in call order; playback transitions are delegated to the
//! playback state machine, and rendered frames are published as
//! [`FrameReadyEvent`]s while playing.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::configuration::RepositoryOptions;
use crate::error::SeekframeError;
use crate::events::{EventEmitter, EventSubscription};
use crate::playback::{PlaybackMode, PlaybackStateMachine};
use crate::queue::{QueuedTask, SerialTaskQueue};
use crate::registry::normalize_key;
use crate::source::{FrameReadyEvent, FrameSource, SourceLoader};
use crate::stream::{FrameEventStream, create_frame_stream};

/// Everything that exists only between `init` and `uninit`.
struct Session<S: FrameSource> {
    source: Arc<S>,
    queue: SerialTaskQueue,
    playback: PlaybackStateMachine<S>,
}

/// Frame-accurate image access over one video resource.
///
/// Every operation other than [`init`](ImageRepository::init) fails with
/// [`SeekframeError::NotInitialized`] until initialization succeeds, and
/// again after [`uninit`](ImageRepository::uninit).
///
/// Repositories are usually obtained from a
/// [`RepositoryRegistry`](crate::RepositoryRegistry), which shares one
/// instance per resource.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "ffmpeg")]
/// # async fn example() -> Result<(), seekframe::SeekframeError> {
/// let repository = seekframe::get_repository("input.mp4").await?;
///
/// // Issued together, resolved in call order.
/// let five = repository.get_image(5_000_000);
/// let one = repository.get_image(1_000_000);
/// println!("{} {}", five.await?.timestamp_us, one.await?.timestamp_us);
///
/// repository.play().await?;
/// repository.pause()?;
/// # Ok(())
/// # }
/// ```
pub struct ImageRepository<L: SourceLoader> {
    key: String,
    identifier: String,
    loader: Arc<L>,
    options: RepositoryOptions,
    events: EventEmitter<FrameReadyEvent>,
    /// Serializes `init` and `uninit`.
    lifecycle: tokio::sync::Mutex<()>,
    session: Mutex<Option<Arc<Session<L::Source>>>>,
}

impl<L: SourceLoader> Debug for ImageRepository<L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ImageRepository")
            .field("key", &self.key)
            .field("initialized", &self.is_initialized())
            .field("mode", &self.mode())
            .field("subscribers", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl<L: SourceLoader> ImageRepository<L> {
    /// Create an uninitialized repository for `identifier`.
    pub fn new(identifier: &str, loader: Arc<L>) -> Self {
        Self::with_options(identifier, loader, RepositoryOptions::default())
    }

    /// Create an uninitialized repository with explicit options.
    ///
    /// The repository's [`key`](ImageRepository::key) is the normalized
    /// identifier; the loader receives the identifier trimmed but otherwise
    /// unchanged.
    pub fn with_options(identifier: &str, loader: Arc<L>, options: RepositoryOptions) -> Self {
        Self {
            key: normalize_key(identifier),
            identifier: identifier.trim().to_string(),
            loader,
            options,
            events: EventEmitter::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    /// Normalized resource key (trimmed, lowercase).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the frame source.
    ///
    /// Idempotent: once initialization has succeeded, later calls return
    /// immediately without loading again. Concurrent calls wait for the
    /// first one.
    ///
    /// # Errors
    ///
    /// Returns [`SeekframeError::SourceLoadFailed`] if the loader fails. The
    /// repository stays uninitialized and a later `init` retries the load.
    pub async fn init(&self) -> Result<(), SeekframeError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        log::debug!("Loading video source: {}", self.identifier);
        let source = self
            .loader
            .load(&self.identifier)
            .await
            .map_err(|error| match error {
                SeekframeError::SourceLoadFailed { .. } => error,
                other => SeekframeError::SourceLoadFailed {
                    key: self.key.clone(),
                    reason: other.to_string(),
                },
            })?;

        let source = Arc::new(source);
        let session = Session {
            playback: PlaybackStateMachine::new(Arc::clone(&source), self.events.clone()),
            queue: SerialTaskQueue::new(),
            source,
        };
        *self.lock_session() = Some(Arc::new(session));

        log::info!("Image repository initialized: {}", self.key);
        Ok(())
    }

    /// Tear the repository down.
    ///
    /// Pauses playback if playing, stops the seek queue (pending seeks fail
    /// with [`SeekframeError::QueueStopped`]; a running seek still completes)
    /// and removes every frame-ready subscriber. Does nothing if the
    /// repository is not initialized.
    pub async fn uninit(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(session) = self.lock_session().take() else {
            return;
        };

        session.playback.teardown();
        session.queue.stop();
        self.events.clear_all();

        log::info!("Image repository uninitialized: {}", self.key);
    }

    /// Returns `true` between a successful `init` and `uninit`.
    pub fn is_initialized(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Current playback mode. `Idle` when uninitialized.
    pub fn mode(&self) -> PlaybackMode {
        self.lock_session()
            .as_ref()
            .map_or(PlaybackMode::Idle, |session| session.playback.mode())
    }

    /// Number of seeks waiting behind the one currently running.
    pub fn queued_seeks(&self) -> usize {
        self.lock_session()
            .as_ref()
            .map_or(0, |session| session.queue.len())
    }

    /// The loaded frame source, e.g. for rendering the current frame.
    pub fn source(&self) -> Result<Arc<L::Source>, SeekframeError> {
        Ok(Arc::clone(&self.session()?.source))
    }

    /// Fetch the frame at `timestamp_us` (microseconds).
    ///
    /// The seek is queued at call time: requests resolve in the order this
    /// method was called, each with the frame rendered for its own
    /// timestamp. The returned [`QueuedTask`] resolves to the
    /// [`FrameReadyEvent`] reported by the source for that frame.
    ///
    /// # Errors
    ///
    /// - [`SeekframeError::NotInitialized`] before `init` / after `uninit`.
    /// - [`SeekframeError::AlreadyPlaying`] while playing, for any timestamp.
    /// - [`SeekframeError::QueueStopped`] if `uninit` runs before the seek
    ///   starts.
    /// - [`SeekframeError::FrameCallbackDropped`] if the source discards the
    ///   request without rendering a frame.
    pub fn get_image(&self, timestamp_us: i64) -> QueuedTask<FrameReadyEvent> {
        let session = match self.session() {
            Ok(session) => session,
            Err(error) => return QueuedTask::rejected(error),
        };
        let permit = match session.playback.begin_seek() {
            Ok(permit) => permit,
            Err(error) => return QueuedTask::rejected(error),
        };

        let task = session.playback.seek_task(permit, timestamp_us);
        session.queue.enqueue(move || task)
    }

    /// Start continuous playback. Frame-ready events are published for every
    /// rendered frame until [`pause`](ImageRepository::pause) or
    /// [`stop`](ImageRepository::stop).
    ///
    /// # Errors
    ///
    /// - [`SeekframeError::NotInitialized`]
    /// - [`SeekframeError::AlreadyPlaying`] if already playing.
    /// - [`SeekframeError::SeekInProgress`] while seeks are pending.
    /// - Any error from the frame source starting playback; the repository
    ///   is then back in `Idle`.
    pub async fn play(&self) -> Result<(), SeekframeError> {
        let session = self.session()?;
        session.playback.play().await
    }

    /// Pause playback at the current position.
    ///
    /// No handler is invoked for a frame after `pause` returns. With a
    /// source that renders on its own thread, a handler that was already
    /// running when `pause` was called may still be finishing; `pause` does
    /// not wait for it, so handlers can pause (or query the repository)
    /// without deadlocking.
    ///
    /// # Errors
    ///
    /// - [`SeekframeError::NotInitialized`]
    /// - [`SeekframeError::NotPlaying`] unless playing.
    /// - Any error from the frame source pausing; the repository then stays
    ///   `Playing`.
    pub fn pause(&self) -> Result<(), SeekframeError> {
        self.session()?.playback.pause()
    }

    /// Pause playback and rewind to time zero.
    ///
    /// The rewind is queued like a seek at call time, so a
    /// [`get_image`](ImageRepository::get_image) issued afterwards resolves
    /// with its own frame, never with the rewind frame. The returned task
    /// resolves to the frame rendered at zero; the repository is `Seeking`
    /// until it settles.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](ImageRepository::pause), plus the seek errors of
    /// [`get_image`](ImageRepository::get_image) for the rewind.
    pub fn stop(&self) -> QueuedTask<FrameReadyEvent> {
        let session = match self.session() {
            Ok(session) => session,
            Err(error) => return QueuedTask::rejected(error),
        };
        let permit = match session.playback.stop() {
            Ok(permit) => permit,
            Err(error) => return QueuedTask::rejected(error),
        };

        let task = session.playback.seek_task(permit, 0);
        session.queue.enqueue(move || task)
    }

    /// Subscribe to frame-ready events. Allowed at any time, including
    /// before `init`; `uninit` removes every subscriber.
    pub fn on<F>(&self, handler: F) -> EventSubscription<FrameReadyEvent>
    where
        F: Fn(&FrameReadyEvent) + Send + Sync + 'static,
    {
        self.events.on(handler)
    }

    /// Subscribe to frame-ready events as an async stream. The stream ends
    /// when the repository is torn down.
    pub fn frame_stream(&self) -> FrameEventStream {
        create_frame_stream(&self.events, self.options.stream_capacity())
    }

    /// Number of frame-ready subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.len()
    }

    fn session(&self) -> Result<Arc<Session<L::Source>>, SeekframeError> {
        self.lock_session()
            .as_ref()
            .map(Arc::clone)
            .ok_or(SeekframeError::NotInitialized)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Arc<Session<L::Source>>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
