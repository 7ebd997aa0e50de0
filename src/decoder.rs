//! FFmpeg-backed frame source.
//!
//! [`FfmpegFrameSource`] drives a dedicated decode worker thread. FFmpeg
//! contexts are not `Send`, so the input is opened on the worker and every
//! operation reaches it as a command over a channel:
//!
//! - **Seek** while paused decodes forward from the preceding keyframe to
//!   the first frame at or after the target and renders it. While playing,
//!   playback simply continues from the new position.
//! - **Play** paces decoded frames by their PTS against a wall clock.
//!   Reaching the end of the stream stops playback; playing again from the
//!   end restarts at zero.
//! - **Pause** stops pacing. The next decoded frame is kept so that playback
//!   resumes without skipping it.
//!
//! Every rendered frame is kept in a short history, whose newest entry is
//! the [`current_image`](FfmpegFrameSource::current_image), and fires the
//! pending one-shot frame callbacks.
//!
//! Each seek, play and pause command carries a generation number. A
//! callback is registered under the newest generation issued so far and
//! fires only for frames the worker renders after handling that command,
//! so a playback frame still in flight when `pause` returns cannot satisfy
//! the seek that follows it.

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use ffmpeg_next::{
    Rational,
    codec::{context::Context as CodecContext, decoder::Video as VideoDecoder},
    format::context::Input,
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::DynamicImage;
use tokio::sync::oneshot;

use crate::configuration::FrameOutputOptions;
use crate::error::SeekframeError;
use crate::source::{
    CallbackId, FrameCallback, FrameCallbacks, FrameMetadata, FrameSource, SourceLoader,
};
use crate::utilities::{frame_to_image, pts_to_seconds, seconds_to_seek_timestamp};

/// Frame interval assumed when the stream does not report a frame rate.
const FALLBACK_FRAME_INTERVAL: f64 = 1.0 / 25.0;

/// Rendered frames retained per source unless configured otherwise.
const DEFAULT_FRAME_HISTORY: usize = 8;

/// Loads video files into [`FfmpegFrameSource`]s.
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    output: FrameOutputOptions,
    frame_history: usize,
}

impl Default for FfmpegLoader {
    fn default() -> Self {
        Self {
            output: FrameOutputOptions::default(),
            frame_history: DEFAULT_FRAME_HISTORY,
        }
    }
}

impl FfmpegLoader {
    /// A loader producing RGB8 frames at source resolution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pixel format and resolution of rendered frames.
    #[must_use]
    pub fn with_output(mut self, output: FrameOutputOptions) -> Self {
        self.output = output;
        self
    }

    /// Number of recently rendered frames each source keeps available
    /// through [`FfmpegFrameSource::frame_image`]. Clamped to a minimum
    /// of 1.
    #[must_use]
    pub fn with_frame_history(mut self, frames: usize) -> Self {
        self.frame_history = frames.max(1);
        self
    }

    /// The output options applied to loaded sources.
    pub fn output(&self) -> &FrameOutputOptions {
        &self.output
    }
}

impl SourceLoader for FfmpegLoader {
    type Source = FfmpegFrameSource;

    fn load(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<FfmpegFrameSource, SeekframeError>> + Send {
        let path = PathBuf::from(identifier);
        let loader = self.clone();
        async move {
            tokio::task::spawn_blocking(move || {
                FfmpegFrameSource::open_with_history(&path, loader.output, loader.frame_history)
            })
            .await
            .map_err(|error| SeekframeError::TaskPanicked(error.to_string()))?
        }
    }
}

/// Stream properties of a loaded video.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoInfo {
    /// Width of rendered frames in pixels.
    pub width: u32,
    /// Height of rendered frames in pixels.
    pub height: u32,
    /// Frames per second (approximate for variable-frame-rate content).
    pub frames_per_second: f64,
    /// Estimated number of frames, from duration and frame rate.
    pub frame_count: u64,
    /// Container duration.
    pub duration: Duration,
    /// Codec name (e.g. `"h264"`).
    pub codec: String,
}

enum Command {
    Seek {
        seconds: f64,
        generation: u64,
    },
    Play {
        generation: u64,
        acknowledge: oneshot::Sender<Result<(), SeekframeError>>,
    },
    Pause {
        generation: u64,
    },
    Shutdown,
}

/// The command channel and the last generation sent over it. Both change
/// under one lock, so generations reach the worker in increasing order.
struct Dispatch {
    sender: Sender<Command>,
    generation: u64,
}

/// State shared between the source handle and its worker.
struct Shared {
    callbacks: FrameCallbacks,
    playing: AtomicBool,
    presented: AtomicU64,
    /// Most recent frames, oldest first, tagged with their presentation
    /// count.
    history: Mutex<VecDeque<(u64, Arc<DynamicImage>)>>,
    history_capacity: usize,
    origin: Instant,
}

impl Shared {
    fn lock_history(&self) -> MutexGuard<'_, VecDeque<(u64, Arc<DynamicImage>)>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A [`FrameSource`] decoding a video file with FFmpeg.
///
/// Dropping the source shuts its worker thread down.
pub struct FfmpegFrameSource {
    dispatch: Mutex<Dispatch>,
    shared: Arc<Shared>,
    info: VideoInfo,
}

impl Debug for FfmpegFrameSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FfmpegFrameSource")
            .field("info", &self.info)
            .field("playing", &self.is_playing())
            .field("pending_callbacks", &self.shared.callbacks.len())
            .finish()
    }
}

impl FfmpegFrameSource {
    /// Open `path` and start a paused decode worker for it.
    ///
    /// Blocks until the worker has opened the file, so call it from a
    /// blocking context. Nothing is rendered until the first seek or play.
    ///
    /// # Errors
    ///
    /// - [`SeekframeError::FfmpegError`] if the file cannot be opened.
    /// - [`SeekframeError::NoVideoStream`] if it has no video stream.
    pub fn open(path: &Path, output: FrameOutputOptions) -> Result<Self, SeekframeError> {
        Self::open_with_history(path, output, DEFAULT_FRAME_HISTORY)
    }

    fn open_with_history(
        path: &Path,
        output: FrameOutputOptions,
        frame_history: usize,
    ) -> Result<Self, SeekframeError> {
        log::debug!("Opening video source: {}", path.display());

        let (commands, receiver) = mpsc::channel();
        let (ready_sender, ready) = mpsc::sync_channel(1);
        let shared = Arc::new(Shared {
            callbacks: FrameCallbacks::new(),
            playing: AtomicBool::new(false),
            presented: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(frame_history)),
            history_capacity: frame_history.max(1),
            origin: Instant::now(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_path = path.to_path_buf();
        thread::Builder::new()
            .name("seekframe-decoder".to_string())
            .spawn(move || {
                let decoder = match FrameDecoder::open(&worker_path, &output) {
                    Ok(decoder) => decoder,
                    Err(error) => {
                        let _ = ready_sender.send(Err(error));
                        return;
                    }
                };
                if ready_sender.send(Ok(decoder.info.clone())).is_err() {
                    return;
                }
                Worker::new(decoder, receiver, worker_shared).run();
            })
            .map_err(|error| {
                SeekframeError::FfmpegError(format!("Failed to spawn decoder thread: {error}"))
            })?;

        let info = ready.recv().map_err(|_| {
            SeekframeError::VideoDecodeError("Decoder thread exited during startup".to_string())
        })??;

        log::info!(
            "Opened {} ({}x{}, {:.3} fps, {:.3}s)",
            path.display(),
            info.width,
            info.height,
            info.frames_per_second,
            info.duration.as_secs_f64()
        );
        Ok(Self {
            dispatch: Mutex::new(Dispatch {
                sender: commands,
                generation: 0,
            }),
            shared,
            info,
        })
    }

    /// Stream properties of the loaded video.
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// The most recently rendered frame, if any.
    pub fn current_image(&self) -> Option<Arc<DynamicImage>> {
        self.shared
            .lock_history()
            .back()
            .map(|(_, image)| Arc::clone(image))
    }

    /// The image of a recently rendered frame, identified by the
    /// [`presented_frames`](FrameMetadata::presented_frames) count reported
    /// with it. `None` once the frame has left the history.
    ///
    /// This is how a caller that issued several seeks at once retrieves
    /// the image belonging to each result.
    pub fn frame_image(&self, presented_frames: u64) -> Option<Arc<DynamicImage>> {
        self.shared
            .lock_history()
            .iter()
            .find(|(count, _)| *count == presented_frames)
            .map(|(_, image)| Arc::clone(image))
    }

    /// Number of frames rendered so far.
    pub fn presented_frames(&self) -> u64 {
        self.shared.presented.load(Ordering::SeqCst)
    }

    /// Send the command built for the next generation.
    fn send(&self, command: impl FnOnce(u64) -> Command) -> Result<(), SeekframeError> {
        let mut dispatch = self.lock_dispatch();
        dispatch.generation += 1;
        let generation = dispatch.generation;
        dispatch
            .sender
            .send(command(generation))
            .map_err(|_| worker_stopped())
    }

    fn lock_dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn worker_stopped() -> SeekframeError {
    SeekframeError::PlaybackFailed("decoder worker has stopped".to_string())
}

impl FrameSource for FfmpegFrameSource {
    fn seek_to(&self, seconds: f64) {
        if self
            .send(|generation| Command::Seek {
                seconds,
                generation,
            })
            .is_err()
        {
            log::warn!("Seek to {seconds:.3}s dropped: decoder worker has stopped");
            self.shared.callbacks.clear();
        }
    }

    fn request_frame_callback(&self, callback: FrameCallback) -> CallbackId {
        let dispatch = self.lock_dispatch();
        self.shared
            .callbacks
            .register_from(dispatch.generation, callback)
    }

    fn cancel_frame_callback(&self, id: CallbackId) {
        self.shared.callbacks.cancel(id);
    }

    fn start_playback(&self) -> impl Future<Output = Result<(), SeekframeError>> + Send {
        let (acknowledge, acknowledged) = oneshot::channel();
        let sent = self.send(|generation| Command::Play {
            generation,
            acknowledge,
        });
        async move {
            sent?;
            acknowledged.await.map_err(|_| worker_stopped())?
        }
    }

    fn pause_playback(&self) -> Result<(), SeekframeError> {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.send(|generation| Command::Pause { generation })
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let _ = self.lock_dispatch().sender.send(Command::Shutdown);
    }
}

/// A frame decoded but not yet scaled.
struct DecodedFrame {
    frame: VideoFrame,
    seconds: f64,
}

/// Decoding state for the best video stream of one input.
struct FrameDecoder {
    input: Input,
    stream_index: usize,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    time_base: Rational,
    output: FrameOutputOptions,
    frame_interval: f64,
    info: VideoInfo,
    /// EOF has been sent to the decoder; only buffered frames remain.
    draining: bool,
}

impl FrameDecoder {
    fn open(path: &Path, output: &FrameOutputOptions) -> Result<Self, SeekframeError> {
        ffmpeg_next::init()?;
        let input = ffmpeg_next::format::input(&path)?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(SeekframeError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 {
            f64::from(frame_rate.numerator()) / f64::from(frame_rate.denominator())
        } else {
            0.0
        };
        let frame_interval = if frames_per_second > 0.0 {
            1.0 / frames_per_second
        } else {
            FALLBACK_FRAME_INTERVAL
        };

        let duration = if input.duration() > 0 {
            Duration::from_micros(input.duration() as u64)
        } else {
            Duration::ZERO
        };
        let frame_count = if frames_per_second > 0.0 {
            (duration.as_secs_f64() * frames_per_second) as u64
        } else {
            0
        };

        let (width, height) = output.resolve_dimensions(decoder.width(), decoder.height());
        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            output.pixel_format.to_ffmpeg_pixel(),
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            time_base,
            output: output.clone(),
            frame_interval,
            info: VideoInfo {
                width,
                height,
                frames_per_second,
                frame_count,
                duration,
                codec,
            },
            draining: false,
        })
    }

    /// Seek to the keyframe at or before `seconds` and reset the decoder.
    fn seek(&mut self, seconds: f64) -> Result<(), SeekframeError> {
        let timestamp = seconds_to_seek_timestamp(seconds);
        self.input.seek(timestamp, ..timestamp)?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    /// Decode the next frame in presentation order, or `None` at end of
    /// stream.
    fn decode_next(&mut self) -> Result<Option<DecodedFrame>, SeekframeError> {
        loop {
            let mut frame = VideoFrame::empty();
            if self.decoder.receive_frame(&mut frame).is_ok() {
                let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
                let seconds = pts_to_seconds(pts, self.time_base);
                return Ok(Some(DecodedFrame { frame, seconds }));
            }
            if self.draining {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder.send_packet(&packet)?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof()?;
                    self.draining = true;
                }
            }
        }
    }

    /// Decode the frame shown at `seconds`: the first frame whose PTS is at
    /// or after the target (within half a frame), or the last frame if the
    /// target lies beyond it.
    fn decode_at(&mut self, seconds: f64) -> Result<DecodedFrame, SeekframeError> {
        let last_frame = (self.info.duration.as_secs_f64() - self.frame_interval).max(0.0);
        let target = if seconds.is_finite() {
            seconds.clamp(0.0, last_frame)
        } else {
            0.0
        };
        self.seek(target)?;

        let tolerance = self.frame_interval / 2.0;
        let mut last = None;
        while let Some(decoded) = self.decode_next()? {
            if decoded.seconds + tolerance >= target {
                return Ok(decoded);
            }
            last = Some(decoded);
        }

        last.ok_or_else(|| {
            SeekframeError::VideoDecodeError(format!("No frame found at {target:.3}s"))
        })
    }

    fn render(&mut self, decoded: &DecodedFrame) -> Result<DynamicImage, SeekframeError> {
        let mut scaled = VideoFrame::empty();
        self.scaler.run(&decoded.frame, &mut scaled)?;
        frame_to_image(
            &scaled,
            self.info.width,
            self.info.height,
            self.output.pixel_format,
        )
    }
}

/// Wall clock for PTS-paced playback.
struct PlaybackClock {
    started: Instant,
    first_pts: Option<f64>,
}

impl PlaybackClock {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            first_pts: None,
        }
    }

    fn deadline(&mut self, pts: f64) -> Instant {
        let first = *self.first_pts.get_or_insert(pts);
        self.started + Duration::from_secs_f64((pts - first).max(0.0))
    }
}

struct Worker {
    decoder: FrameDecoder,
    commands: Receiver<Command>,
    shared: Arc<Shared>,
    /// Playback clock, present while playing.
    clock: Option<PlaybackClock>,
    /// Next frame to present during playback.
    staged: Option<DecodedFrame>,
    at_end: bool,
    /// Generation of the last command handled; tags presented frames.
    generation: u64,
}

impl Worker {
    fn new(decoder: FrameDecoder, commands: Receiver<Command>, shared: Arc<Shared>) -> Self {
        Self {
            decoder,
            commands,
            shared,
            clock: None,
            staged: None,
            at_end: false,
            generation: 0,
        }
    }

    fn run(mut self) {
        log::debug!("Decoder worker started");
        loop {
            let command = if self.clock.is_some() {
                match self.advance_playback() {
                    Some(wait) => match self.commands.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    None => continue,
                }
            } else {
                match self.commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                }
            };

            match command {
                Command::Seek {
                    seconds,
                    generation,
                } => {
                    self.generation = generation;
                    self.handle_seek(seconds);
                }
                Command::Play {
                    generation,
                    acknowledge,
                } => {
                    self.generation = generation;
                    let _ = acknowledge.send(self.handle_play());
                }
                Command::Pause { generation } => {
                    self.generation = generation;
                    self.stop_clock();
                }
                Command::Shutdown => break,
            }
        }

        // Seekers still waiting on a frame observe a dropped callback.
        self.shared.callbacks.clear();
        log::debug!("Decoder worker stopped");
    }

    /// Present the staged frame if it is due. Returns how long to wait for
    /// the next one, or `None` if the loop should run again immediately.
    fn advance_playback(&mut self) -> Option<Duration> {
        if self.staged.is_none() {
            match self.decoder.decode_next() {
                Ok(Some(decoded)) => self.staged = Some(decoded),
                Ok(None) => {
                    log::debug!("End of stream reached, stopping playback");
                    self.at_end = true;
                    self.stop_clock();
                    return None;
                }
                Err(error) => {
                    log::warn!("Decoding failed during playback: {error}");
                    self.stop_clock();
                    return None;
                }
            }
        }

        let (Some(clock), Some(staged)) = (self.clock.as_mut(), self.staged.as_ref()) else {
            return None;
        };
        let wait = clock.deadline(staged.seconds).saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            return Some(wait);
        }

        if let Some(decoded) = self.staged.take() {
            if let Err(error) = self.present(&decoded) {
                log::warn!("Failed to render frame at {:.3}s: {error}", decoded.seconds);
            }
        }
        None
    }

    fn handle_seek(&mut self, seconds: f64) {
        self.staged = None;
        self.at_end = false;

        if self.clock.is_some() {
            match self.decoder.seek(seconds) {
                Ok(()) => self.clock = Some(PlaybackClock::start()),
                Err(error) => {
                    log::warn!("Seek to {seconds:.3}s failed: {error}");
                    self.stop_clock();
                }
            }
            return;
        }

        let result = self
            .decoder
            .decode_at(seconds)
            .and_then(|decoded| self.present(&decoded));
        if let Err(error) = result {
            log::warn!("Seek to {seconds:.3}s failed: {error}");
            self.shared.callbacks.clear();
        }
    }

    fn handle_play(&mut self) -> Result<(), SeekframeError> {
        if self.at_end {
            self.decoder.seek(0.0)?;
            self.staged = None;
            self.at_end = false;
        }
        self.clock = Some(PlaybackClock::start());
        self.shared.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_clock(&mut self) {
        self.clock = None;
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn present(&mut self, decoded: &DecodedFrame) -> Result<(), SeekframeError> {
        let image = self.decoder.render(decoded)?;
        let presented_frames = self.shared.presented.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut history = self.shared.lock_history();
            if history.len() == self.shared.history_capacity {
                history.pop_front();
            }
            history.push_back((presented_frames, Arc::new(image)));
        }

        let now = self.shared.origin.elapsed();
        let metadata = FrameMetadata {
            media_time: decoded.seconds,
            presented_frames,
            width: self.decoder.info.width,
            height: self.decoder.info.height,
            expected_display_time: now,
        };
        self.shared
            .callbacks
            .fire_for(self.generation, now, metadata);
        Ok(())
    }
}
