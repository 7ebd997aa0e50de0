//! Playback state machine.
//!
//! Arbitrates between seeking and continuous playback on a single
//! [`FrameSource`]:
//!
//! | From    | Operation   | To             |
//! |---------|-------------|----------------|
//! | Idle    | seek        | Seeking → Idle |
//! | Seeking | seek        | Seeking        |
//! | Idle    | `play`      | Playing        |
//! | Playing | `pause`     | Idle           |
//! | Playing | `stop`      | Seeking → Idle |
//! | any     | teardown    | Idle           |
//!
//! `stop` queues its rewind like any other seek. Every other combination
//! is rejected. Seeks and playback are mutually exclusive because a one-shot
//! seek callback and the continuous playback callback would otherwise share
//! the source's frame notifications with no way to tell which caller a frame
//! belongs to.
//!
//! The continuous frame subscription exists if and only if the mode is
//! [`PlaybackMode::Playing`].

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::oneshot;

use crate::conversion::microseconds_to_seconds;
use crate::error::SeekframeError;
use crate::events::EventEmitter;
use crate::source::{CallbackId, FrameReadyEvent, FrameSource};

/// Current mode of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackMode {
    /// No subscription and no seek in flight.
    #[default]
    Idle,
    /// At least one seek is queued or running.
    Seeking,
    /// Continuous playback with a live frame subscription.
    Playing,
}

impl Display for PlaybackMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            PlaybackMode::Idle => "idle",
            PlaybackMode::Seeking => "seeking",
            PlaybackMode::Playing => "playing",
        };
        f.write_str(name)
    }
}

struct MachineState {
    mode: PlaybackMode,
    /// Seeks that have been accepted but not yet settled.
    pending_seeks: usize,
    subscription: Option<FrameSubscription>,
    /// Bumped by every `play`; a start that fails only reverts its own.
    play_generation: u64,
}

/// Owns the playback mode and the continuous frame subscription for one
/// frame source.
pub(crate) struct PlaybackStateMachine<S: FrameSource> {
    source: Arc<S>,
    events: EventEmitter<FrameReadyEvent>,
    state: Arc<Mutex<MachineState>>,
}

impl<S: FrameSource> PlaybackStateMachine<S> {
    pub(crate) fn new(source: Arc<S>, events: EventEmitter<FrameReadyEvent>) -> Self {
        Self {
            source,
            events,
            state: Arc::new(Mutex::new(MachineState {
                mode: PlaybackMode::Idle,
                pending_seeks: 0,
                subscription: None,
                play_generation: 0,
            })),
        }
    }

    pub(crate) fn mode(&self) -> PlaybackMode {
        lock(&self.state).mode
    }

    /// Enter (or stay in) `Seeking` for one more seek.
    ///
    /// The returned permit keeps the machine in `Seeking` until it is
    /// dropped; the last permit to drop returns the machine to `Idle`.
    pub(crate) fn begin_seek(&self) -> Result<SeekPermit, SeekframeError> {
        let mut state = lock(&self.state);
        match state.mode {
            PlaybackMode::Playing => Err(SeekframeError::AlreadyPlaying),
            PlaybackMode::Idle | PlaybackMode::Seeking => Ok(self.admit_seek(&mut state)),
        }
    }

    fn admit_seek(&self, state: &mut MachineState) -> SeekPermit {
        if state.mode == PlaybackMode::Idle {
            log::debug!("Playback mode: idle -> seeking");
        }
        state.mode = PlaybackMode::Seeking;
        state.pending_seeks += 1;
        SeekPermit {
            state: Arc::clone(&self.state),
        }
    }

    /// Build the queued work for one seek: register a one-shot callback,
    /// move the position, and wait for that callback.
    ///
    /// The callback is registered before the position change so the frame
    /// rendered for this seek cannot be missed.
    pub(crate) fn seek_task(
        &self,
        permit: SeekPermit,
        timestamp_us: i64,
    ) -> impl Future<Output = Result<FrameReadyEvent, SeekframeError>> + Send + use<S> {
        let source = Arc::clone(&self.source);
        async move {
            let _permit = permit;
            let (sender, receiver) = oneshot::channel();
            let callback_id = source.request_frame_callback(Box::new(move |now, metadata| {
                let _ = sender.send(FrameReadyEvent::new(now, metadata));
            }));
            let mut pending = PendingCallback {
                source: &*source,
                id: Some(callback_id),
            };

            log::debug!("Seeking to {timestamp_us} us");
            source.seek_to(microseconds_to_seconds(timestamp_us));

            let result = receiver.await;
            pending.id = None;
            result.map_err(|_| SeekframeError::FrameCallbackDropped)
        }
    }

    /// `Idle -> Playing`.
    ///
    /// The subscription is registered before playback starts so the first
    /// played frame is observed. If the source fails to start, the
    /// subscription is released and the mode reverts to `Idle`.
    pub(crate) async fn play(&self) -> Result<(), SeekframeError> {
        let generation = {
            let mut state = lock(&self.state);
            match state.mode {
                PlaybackMode::Playing => return Err(SeekframeError::AlreadyPlaying),
                PlaybackMode::Seeking => return Err(SeekframeError::SeekInProgress),
                PlaybackMode::Idle => {}
            }
            state.mode = PlaybackMode::Playing;
            state.subscription = Some(FrameSubscription::acquire(&self.source, &self.events));
            state.play_generation += 1;
            state.play_generation
        };
        log::debug!("Playback mode: idle -> playing");

        if let Err(error) = self.source.start_playback().await {
            log::warn!("Frame source failed to start playback: {error}");
            let mut state = lock(&self.state);
            // A pause and a newer `play` may have landed meanwhile; their
            // subscription is not ours to release.
            if state.play_generation == generation && state.mode == PlaybackMode::Playing {
                if let Some(subscription) = state.subscription.take() {
                    subscription.release(&*self.source);
                }
                state.mode = PlaybackMode::Idle;
            }
            return Err(error);
        }

        // A pause (or teardown) may have landed while the start was pending.
        if self.mode() != PlaybackMode::Playing {
            log::debug!("Playback was paused while starting; pausing the source again");
            self.source.pause_playback()?;
        }
        Ok(())
    }

    /// `Playing -> Idle`.
    ///
    /// Releases the subscription and then pauses the source. If the source
    /// refuses to pause, the mode is restored to `Playing` with a fresh
    /// subscription and the error is returned.
    pub(crate) fn pause(&self) -> Result<(), SeekframeError> {
        let mut state = lock(&self.state);
        self.pause_locked(&mut state)
    }

    /// `Playing -> Seeking`: pause, then admit the rewind to time zero as a
    /// seek, under one lock so no `play` can slip in between. The caller
    /// queues the rewind with the returned permit so that later seeks cannot
    /// observe the frame it renders.
    pub(crate) fn stop(&self) -> Result<SeekPermit, SeekframeError> {
        let mut state = lock(&self.state);
        self.pause_locked(&mut state)?;
        Ok(self.admit_seek(&mut state))
    }

    fn pause_locked(&self, state: &mut MachineState) -> Result<(), SeekframeError> {
        if state.mode != PlaybackMode::Playing {
            return Err(SeekframeError::NotPlaying);
        }

        if let Some(subscription) = state.subscription.take() {
            subscription.release(&*self.source);
        }
        state.mode = PlaybackMode::Idle;

        if let Err(error) = self.source.pause_playback() {
            log::warn!("Frame source failed to pause: {error}");
            state.mode = PlaybackMode::Playing;
            state.subscription = Some(FrameSubscription::acquire(&self.source, &self.events));
            return Err(error);
        }

        log::debug!("Playback mode: playing -> idle");
        Ok(())
    }

    /// Force the machine back to `Idle`, pausing first if playing. Never
    /// fails: a pause error is logged and the subscription is released
    /// regardless.
    pub(crate) fn teardown(&self) {
        if self.mode() == PlaybackMode::Playing {
            if let Err(error) = self.pause() {
                log::warn!("Pause during teardown failed: {error}");
            }
        }

        let mut state = lock(&self.state);
        if let Some(subscription) = state.subscription.take() {
            subscription.release(&*self.source);
        }
        state.mode = PlaybackMode::Idle;
        state.pending_seeks = 0;
    }
}

fn lock(state: &Mutex<MachineState>) -> MutexGuard<'_, MachineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the machine in `Seeking` while alive.
pub(crate) struct SeekPermit {
    state: Arc<Mutex<MachineState>>,
}

impl Drop for SeekPermit {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.pending_seeks = state.pending_seeks.saturating_sub(1);
        if state.pending_seeks == 0 && state.mode == PlaybackMode::Seeking {
            state.mode = PlaybackMode::Idle;
            log::debug!("Playback mode: seeking -> idle");
        }
    }
}

/// Cancels a one-shot callback that never fired (e.g. because the seek task
/// was dropped).
struct PendingCallback<'a, S: FrameSource> {
    source: &'a S,
    id: Option<CallbackId>,
}

impl<S: FrameSource> Drop for PendingCallback<'_, S> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.source.cancel_frame_callback(id);
        }
    }
}

struct SubscriptionSlot {
    live: bool,
    callback: Option<CallbackId>,
}

/// The continuous frame-ready subscription held while playing.
///
/// Implemented on top of one-shot callbacks: each firing publishes a
/// [`FrameReadyEvent`] and re-arms a callback for the next frame until the
/// subscription is released.
pub(crate) struct FrameSubscription {
    slot: Arc<Mutex<SubscriptionSlot>>,
}

impl FrameSubscription {
    fn acquire<S: FrameSource>(source: &Arc<S>, events: &EventEmitter<FrameReadyEvent>) -> Self {
        let slot = Arc::new(Mutex::new(SubscriptionSlot {
            live: true,
            callback: None,
        }));
        arm(Arc::downgrade(source), events.clone(), Arc::clone(&slot));
        Self { slot }
    }

    fn release<S: FrameSource>(self, source: &S) {
        let mut slot = lock_slot(&self.slot);
        slot.live = false;
        if let Some(id) = slot.callback.take() {
            source.cancel_frame_callback(id);
        }
    }
}

/// Register the next one-shot callback of a live subscription.
///
/// The callback holds the source weakly: the source owns its pending
/// callbacks, so a strong reference would keep it alive forever.
fn arm<S: FrameSource>(
    source: Weak<S>,
    events: EventEmitter<FrameReadyEvent>,
    slot: Arc<Mutex<SubscriptionSlot>>,
) {
    let Some(strong_source) = source.upgrade() else {
        return;
    };

    let mut guard = lock_slot(&slot);
    if !guard.live {
        return;
    }

    let callback_slot = Arc::clone(&slot);
    let id = strong_source.request_frame_callback(Box::new(move |now, metadata| {
        {
            let mut slot = lock_slot(&callback_slot);
            if !slot.live {
                return;
            }
            slot.callback = None;
        }
        // Emitted without holding the slot so handlers may pause playback.
        // Liveness is re-checked per handler: once a release returns, no
        // further handler starts for this frame, though one already running
        // on the source's thread may still finish.
        let event = FrameReadyEvent::new(now, metadata);
        events.emit_while(&event, || lock_slot(&callback_slot).live);
        arm(source, events, callback_slot);
    }));
    guard.callback = Some(id);
}

fn lock_slot(slot: &Mutex<SubscriptionSlot>) -> MutexGuard<'_, SubscriptionSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
