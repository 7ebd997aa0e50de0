//! Scripted in-memory frame source shared by the integration tests.
//!
//! Seeks render on a spawned task after a fixed base latency plus a latency
//! proportional to the target position, so a later seek to an earlier
//! timestamp would finish first if seeks were not serialized, and even a seek
//! to zero is still in flight when the caller returns. Playback frames are produced by
//! calling [`ScriptedSource::tick`].

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seekframe::{
    CallbackId, FrameCallback, FrameCallbacks, FrameMetadata, FrameSource, ImageRepository,
    SeekframeError, SourceLoader,
};

/// Render latency of every seek, whatever its target.
pub const BASE_LATENCY: Duration = Duration::from_millis(5);

/// Render latency per second of target position.
pub const LATENCY_PER_SECOND: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Script {
    journal: Vec<String>,
    presented: u64,
    seeks_in_flight: usize,
    max_seeks_in_flight: usize,
}

pub struct ScriptedSource {
    callbacks: Arc<FrameCallbacks>,
    script: Arc<Mutex<Script>>,
    playing: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    pauses: AtomicUsize,
    start_delay: Duration,
    pub fail_start: AtomicBool,
    pub fail_pause: AtomicBool,
    pub drop_seeks: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(start_delay: Duration) -> Self {
        Self {
            callbacks: Arc::new(FrameCallbacks::new()),
            script: Arc::new(Mutex::new(Script::default())),
            playing: Arc::new(AtomicBool::new(false)),
            starts: Arc::new(AtomicUsize::new(0)),
            pauses: AtomicUsize::new(0),
            start_delay,
            fail_start: AtomicBool::new(false),
            fail_pause: AtomicBool::new(false),
            drop_seeks: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Render one playback frame at `media_time` if playing. Returns the
    /// number of callbacks fired.
    pub fn tick(&self, media_time: f64) -> usize {
        if !self.playing.load(Ordering::SeqCst) {
            return 0;
        }
        let metadata = render(&self.script, media_time);
        self.callbacks.fire(Duration::from_secs_f64(media_time), metadata)
    }

    /// Callbacks currently waiting for a frame.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// `seek <t>` and `render <t>` entries in the order they happened.
    pub fn journal(&self) -> Vec<String> {
        self.script.lock().unwrap().journal.clone()
    }

    pub fn max_seeks_in_flight(&self) -> usize {
        self.script.lock().unwrap().max_seeks_in_flight
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

fn render(script: &Mutex<Script>, media_time: f64) -> FrameMetadata {
    let mut script = script.lock().unwrap();
    script.presented += 1;
    script.journal.push(format!("render {media_time}"));
    FrameMetadata {
        media_time,
        presented_frames: script.presented,
        width: 4,
        height: 3,
        expected_display_time: Duration::from_secs_f64(media_time),
    }
}

impl FrameSource for ScriptedSource {
    fn seek_to(&self, seconds: f64) {
        {
            let mut script = self.script.lock().unwrap();
            script.journal.push(format!("seek {seconds}"));
            script.seeks_in_flight += 1;
            script.max_seeks_in_flight = script.max_seeks_in_flight.max(script.seeks_in_flight);
        }

        let callbacks = Arc::clone(&self.callbacks);
        let script = Arc::clone(&self.script);
        let drop_seeks = Arc::clone(&self.drop_seeks);
        let latency = BASE_LATENCY + LATENCY_PER_SECOND.mul_f64(seconds.max(0.0));
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            script.lock().unwrap().seeks_in_flight -= 1;
            if drop_seeks.load(Ordering::SeqCst) {
                callbacks.clear();
                return;
            }
            let metadata = render(&script, seconds);
            callbacks.fire(latency, metadata);
        });
    }

    fn request_frame_callback(&self, callback: FrameCallback) -> CallbackId {
        self.callbacks.register(callback)
    }

    fn cancel_frame_callback(&self, id: CallbackId) {
        self.callbacks.cancel(id);
    }

    fn start_playback(&self) -> impl Future<Output = Result<(), SeekframeError>> + Send {
        // Whether this start fails is decided when it is requested.
        let fail = self.fail_start.load(Ordering::SeqCst);
        let playing = Arc::clone(&self.playing);
        let starts = Arc::clone(&self.starts);
        let delay = self.start_delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(SeekframeError::PlaybackFailed("scripted start failure".into()));
            }
            playing.store(true, Ordering::SeqCst);
            starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pause_playback(&self) -> Result<(), SeekframeError> {
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(SeekframeError::PlaybackFailed("scripted pause failure".into()));
        }
        self.playing.store(false, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Loader producing [`ScriptedSource`]s, counting loads.
#[derive(Default)]
pub struct ScriptedLoader {
    loads: AtomicUsize,
    failures_left: AtomicUsize,
    load_delay: Duration,
    start_delay: Duration,
    identifiers: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` loads.
    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.identifiers.lock().unwrap().clone()
    }
}

impl SourceLoader for ScriptedLoader {
    type Source = ScriptedSource;

    fn load(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<ScriptedSource, SeekframeError>> + Send {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.identifiers.lock().unwrap().push(identifier.to_string());
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let load_delay = self.load_delay;
        let start_delay = self.start_delay;
        let identifier = identifier.to_string();
        async move {
            if !load_delay.is_zero() {
                tokio::time::sleep(load_delay).await;
            }
            if fail {
                return Err(SeekframeError::SourceLoadFailed {
                    key: identifier,
                    reason: "scripted load failure".into(),
                });
            }
            Ok(ScriptedSource::new(start_delay))
        }
    }
}

/// An initialized repository over a fresh scripted source.
pub async fn initialized_repository() -> Arc<ImageRepository<ScriptedLoader>> {
    let repository = Arc::new(ImageRepository::new("clip.mp4", Arc::new(ScriptedLoader::new())));
    repository.init().await.unwrap();
    repository
}

/// Seconds as they appear in the journal.
pub fn seek_entry(timestamp_us: i64) -> String {
    format!("seek {}", timestamp_us as f64 / 1_000_000.0)
}

pub fn render_entry(timestamp_us: i64) -> String {
    format!("render {}", timestamp_us as f64 / 1_000_000.0)
}
