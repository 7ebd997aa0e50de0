//! Async stream of frame-ready events.
//!
//! [`FrameEventStream`] subscribes to a repository's frame-ready events and
//! forwards them through a bounded channel, so playback frames can be
//! consumed with [`StreamExt`](tokio_stream::StreamExt) combinators instead
//! of a callback.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # async fn example() -> Result<(), seekframe::SeekframeError> {
//! use tokio_stream::StreamExt;
//!
//! let repository = seekframe::get_repository("input.mp4").await?;
//! let mut frames = repository.frame_stream();
//! repository.play().await?;
//!
//! while let Some(event) = frames.next().await {
//!     println!("frame at {} us", event.timestamp_us);
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{self, Receiver, error::TrySendError};
use tokio_stream::Stream;

use crate::events::{EventEmitter, EventSubscription};
use crate::source::FrameReadyEvent;

/// Default bounded-channel capacity for [`FrameEventStream`].
pub(crate) const DEFAULT_STREAM_CAPACITY: usize = 8;

/// A stream of frame-ready events.
///
/// Events are delivered in the order the frame source rendered them. When
/// the consumer falls more than the channel capacity behind, newer events
/// are dropped rather than stalling the frame source. The stream ends when
/// the repository is torn down; dropping it unsubscribes.
pub struct FrameEventStream {
    receiver: Receiver<FrameReadyEvent>,
    subscription: EventSubscription<FrameReadyEvent>,
}

impl Stream for FrameEventStream {
    type Item = FrameReadyEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for FrameEventStream {
    fn drop(&mut self) {
        self.subscription.off();
    }
}

/// Subscribe a new [`FrameEventStream`] to `emitter`.
pub(crate) fn create_frame_stream(
    emitter: &EventEmitter<FrameReadyEvent>,
    capacity: usize,
) -> FrameEventStream {
    let (sender, receiver) = mpsc::channel(capacity.max(1));

    let subscription = emitter.on(move |event: &FrameReadyEvent| {
        if let Err(TrySendError::Full(event)) = sender.try_send(*event) {
            log::trace!("Frame stream is full, dropping frame at {} us", event.timestamp_us);
        }
    });

    FrameEventStream {
        receiver,
        subscription,
    }
}
