//! Frame source and resource loader contracts.
//!
//! A [`FrameSource`] is the external resource the repository drives: it can
//! be told to seek, it can be started into continuous playback, and it
//! notifies one-shot callbacks after each frame it renders. A
//! [`SourceLoader`] produces frame sources from resource identifiers.
//!
//! [`FrameCallbacks`] is a small registry that frame source implementations
//! can use to hold pending one-shot callbacks.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::conversion::seconds_to_microseconds;
use crate::error::SeekframeError;

/// Identifier of a registered one-shot frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Native per-frame data reported by a frame source when it renders a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    /// Presentation time of the rendered frame, in seconds.
    pub media_time: f64,
    /// Number of frames the source has rendered so far, including this one.
    pub presented_frames: u64,
    /// Width of the rendered frame in pixels.
    pub width: u32,
    /// Height of the rendered frame in pixels.
    pub height: u32,
    /// Time (relative to the source's clock origin) at which the frame was
    /// handed to the display.
    pub expected_display_time: Duration,
}

/// Immutable notification that a frame has been rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReadyEvent {
    /// Frame timestamp in microseconds, converted from
    /// [`FrameMetadata::media_time`].
    pub timestamp_us: i64,
    /// Wall-clock time (relative to the source's clock origin) at which the
    /// callback fired.
    pub now: Duration,
    /// The source's native frame data.
    pub metadata: FrameMetadata,
}

impl FrameReadyEvent {
    /// Build an event from the values handed to a frame callback.
    pub fn new(now: Duration, metadata: FrameMetadata) -> Self {
        Self {
            timestamp_us: seconds_to_microseconds(metadata.media_time),
            now,
            metadata,
        }
    }
}

/// One-shot callback fired with `(now, metadata)` after the next rendered
/// frame.
pub type FrameCallback = Box<dyn FnOnce(Duration, FrameMetadata) + Send + 'static>;

/// A resource producing sequential images keyed by a time position.
///
/// Implementations must never invoke a callback synchronously from inside
/// [`request_frame_callback`](FrameSource::request_frame_callback), and must
/// not hold internal locks while invoking callbacks: a callback is allowed
/// to call back into the source.
pub trait FrameSource: Send + Sync + 'static {
    /// Move the playback position to `seconds`. Fire-and-forget: the frame
    /// at the new position is reported through frame callbacks.
    fn seek_to(&self, seconds: f64);

    /// Register a callback that fires once, after the next frame rendered
    /// following the most recent position change or playback start.
    fn request_frame_callback(&self, callback: FrameCallback) -> CallbackId;

    /// Cancel a callback that has not fired yet. Unknown ids are ignored.
    fn cancel_frame_callback(&self, id: CallbackId);

    /// Begin continuous playback. Resolves once playback has started.
    fn start_playback(&self) -> impl Future<Output = Result<(), SeekframeError>> + Send;

    /// Pause continuous playback.
    fn pause_playback(&self) -> Result<(), SeekframeError>;

    /// Returns `true` while the source is playing.
    fn is_playing(&self) -> bool;
}

/// Asynchronous factory for frame sources.
pub trait SourceLoader: Send + Sync + 'static {
    /// The frame source type this loader produces.
    type Source: FrameSource;

    /// Load the resource named by `identifier`.
    fn load(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<Self::Source, SeekframeError>> + Send;
}

struct PendingEntry {
    id: CallbackId,
    /// Oldest frame generation this callback may fire for.
    from: u64,
    callback: FrameCallback,
}

struct CallbackTable {
    last_id: u64,
    entries: Vec<PendingEntry>,
}

/// Registry of pending one-shot frame callbacks.
///
/// Callbacks fire in registration order. [`fire`](FrameCallbacks::fire)
/// removes every callback registered so far before invoking any of them, so
/// a callback that registers a new one is scheduled for the following frame.
///
/// Sources that render on their own thread can tag callbacks with a
/// generation ([`register_from`](FrameCallbacks::register_from)) and frames
/// with the generation they were rendered under
/// ([`fire_for`](FrameCallbacks::fire_for)). A frame only fires callbacks
/// whose generation it has reached, so a frame already being rendered when
/// a command was issued cannot complete a callback registered after it.
pub struct FrameCallbacks {
    table: Mutex<CallbackTable>,
}

impl Debug for FrameCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let table = self.lock();
        f.debug_struct("FrameCallbacks")
            .field("pending", &table.entries.len())
            .field("last_id", &table.last_id)
            .finish()
    }
}

impl Default for FrameCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCallbacks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(CallbackTable {
                last_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Store a callback that fires for the next frame, whatever its
    /// generation, and return its id.
    pub fn register(&self, callback: FrameCallback) -> CallbackId {
        self.register_from(0, callback)
    }

    /// Store a callback that only fires for a frame of `generation` or
    /// later.
    pub fn register_from(&self, generation: u64, callback: FrameCallback) -> CallbackId {
        let mut table = self.lock();
        table.last_id += 1;
        let id = CallbackId(table.last_id);
        table.entries.push(PendingEntry {
            id,
            from: generation,
            callback,
        });
        id
    }

    /// Remove a callback without firing it. Returns `false` if the id is not
    /// pending.
    pub fn cancel(&self, id: CallbackId) -> bool {
        let mut table = self.lock();
        let before = table.entries.len();
        table.entries.retain(|entry| entry.id != id);
        table.entries.len() != before
    }

    /// Fire and remove every pending callback. Returns how many fired.
    pub fn fire(&self, now: Duration, metadata: FrameMetadata) -> usize {
        self.fire_for(u64::MAX, now, metadata)
    }

    /// Fire and remove the callbacks registered for `generation` or
    /// earlier. Later ones stay pending. Returns how many fired.
    pub fn fire_for(&self, generation: u64, now: Duration, metadata: FrameMetadata) -> usize {
        let due: Vec<PendingEntry> = {
            let mut table = self.lock();
            let (due, pending) = std::mem::take(&mut table.entries)
                .into_iter()
                .partition(|entry| entry.from <= generation);
            table.entries = pending;
            due
        };
        let count = due.len();
        for entry in due {
            (entry.callback)(now, metadata);
        }
        count
    }

    /// Drop every pending callback without firing it. Returns how many were
    /// dropped.
    pub fn clear(&self) -> usize {
        let callbacks = std::mem::take(&mut self.lock().entries);
        callbacks.len()
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no callback is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CallbackTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn metadata(media_time: f64) -> FrameMetadata {
        FrameMetadata {
            media_time,
            presented_frames: 1,
            width: 16,
            height: 9,
            expected_display_time: Duration::ZERO,
        }
    }

    #[test]
    fn event_converts_media_time() {
        let event = FrameReadyEvent::new(Duration::from_millis(5), metadata(2.5));
        assert_eq!(event.timestamp_us, 2_500_000);
        assert_eq!(event.now, Duration::from_millis(5));
    }

    #[test]
    fn callbacks_fire_once() {
        let callbacks = FrameCallbacks::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        callbacks.register(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(callbacks.fire(Duration::ZERO, metadata(0.0)), 1);
        assert_eq!(callbacks.fire(Duration::ZERO, metadata(0.0)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_callback_does_not_fire() {
        let callbacks = FrameCallbacks::new();
        let id = callbacks.register(Box::new(|_, _| panic!("cancelled callback fired")));
        assert!(callbacks.cancel(id));
        assert!(!callbacks.cancel(id));
        assert_eq!(callbacks.fire(Duration::ZERO, metadata(0.0)), 0);
    }

    #[test]
    fn clear_drops_without_firing() {
        let callbacks = FrameCallbacks::new();
        callbacks.register(Box::new(|_, _| panic!("cleared callback fired")));
        callbacks.register(Box::new(|_, _| panic!("cleared callback fired")));
        assert_eq!(callbacks.clear(), 2);
        assert!(callbacks.is_empty());
    }
}
