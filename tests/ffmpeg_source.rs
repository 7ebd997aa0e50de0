//! FFmpeg frame source integration tests.
//!
//! Tests require fixture files from `tests/fixtures/generate_fixtures.sh`.

#![cfg(feature = "ffmpeg")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use seekframe::{
    FfmpegLoader, FrameOutputOptions, FrameSource, PixelFormat, RepositoryRegistry,
    SeekframeError,
};
use tokio_stream::StreamExt;

fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

/// One frame at 30 fps, in microseconds.
const FRAME_US: i64 = 33_334;

// ── Loading ──────────────────────────────────────────────────────

#[tokio::test]
async fn open_reports_stream_info() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();
    let source = repository.source().unwrap();
    let info = source.info();

    assert_eq!((info.width, info.height), (640, 480));
    assert!((info.frames_per_second - 30.0).abs() < 0.01);
    assert!(info.duration >= Duration::from_millis(4_900));
    assert!(info.frame_count >= 140);
    assert_eq!(info.codec, "h264");
    assert!(source.current_image().is_none());
    assert!(!source.is_playing());
}

#[tokio::test]
async fn missing_file_fails_to_load() {
    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let result = registry.get_repository("tests/fixtures/does_not_exist.mp4").await;
    assert!(matches!(
        result,
        Err(SeekframeError::SourceLoadFailed { .. })
    ));
    assert!(registry.is_empty());
}

// ── Seeking ──────────────────────────────────────────────────────

#[tokio::test]
async fn seek_renders_the_requested_frame() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();

    let event = repository.get_image(1_000_000).await.unwrap();
    assert!((event.timestamp_us - 1_000_000).abs() < FRAME_US);
    assert_eq!((event.metadata.width, event.metadata.height), (640, 480));

    let source = repository.source().unwrap();
    let image = source.frame_image(event.metadata.presented_frames).unwrap();
    assert_eq!((image.width(), image.height()), (640, 480));
}

#[tokio::test]
async fn concurrent_seeks_resolve_in_call_order() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();

    let targets = [3_000_000_i64, 500_000, 2_000_000];
    let requests: Vec<_> = targets
        .iter()
        .map(|&timestamp| repository.get_image(timestamp))
        .collect();

    let mut presented = Vec::new();
    for (request, target) in requests.into_iter().zip(targets) {
        let event = request.await.unwrap();
        assert!(
            (event.timestamp_us - target).abs() < FRAME_US,
            "requested {target}, got {}",
            event.timestamp_us
        );
        presented.push(event.metadata.presented_frames);
    }
    assert_eq!(presented, vec![1, 2, 3]);
}

#[tokio::test]
async fn seek_past_end_clamps_to_last_frame() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();
    let duration_us = repository.source().unwrap().info().duration.as_micros() as i64;

    let event = repository.get_image(i64::MAX / 2).await.unwrap();
    assert!(event.timestamp_us <= duration_us);
    assert!(event.timestamp_us >= duration_us - 2 * FRAME_US);

    let first = repository.get_image(-1_000_000).await.unwrap();
    assert!(first.timestamp_us < FRAME_US);
}

#[tokio::test]
async fn output_options_scale_and_convert_frames() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let output = FrameOutputOptions::new()
        .with_pixel_format(PixelFormat::Gray8)
        .with_resolution(Some(160), None);
    let registry = RepositoryRegistry::new(FfmpegLoader::new().with_output(output));
    let repository = registry.get_repository(path).await.unwrap();

    let event = repository.get_image(0).await.unwrap();
    assert_eq!((event.metadata.width, event.metadata.height), (160, 120));

    let image = repository.source().unwrap().current_image().unwrap();
    assert!(image.as_luma8().is_some());
}

// ── Playback ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn playback_publishes_increasing_timestamps() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();
    let mut frames = repository.frame_stream();

    repository.play().await.unwrap();
    let mut timestamps = Vec::new();
    while timestamps.len() < 5 {
        let event = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap()
            .unwrap();
        timestamps.push(event.timestamp_us);
    }
    repository.pause().unwrap();

    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(!repository.source().unwrap().is_playing());

    // Seeking works again once paused.
    assert!(repository.get_image(0).await.is_ok());
    assert!(registry.remove(path).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seek_after_pause_gets_its_own_frame() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();
    let mut frames = repository.frame_stream();

    for round in 0..5 {
        repository.play().await.unwrap();
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .unwrap()
                .unwrap();
        }
        repository.pause().unwrap();

        let event = repository.get_image(3_000_000).await.unwrap();
        assert!(
            (event.timestamp_us - 3_000_000).abs() < FRAME_US,
            "round {round}: got {}",
            event.timestamp_us
        );
        repository.get_image(0).await.unwrap();
    }
}

#[tokio::test]
async fn shared_registry_reuses_the_open_source() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let first = registry.get_repository(path).await.unwrap();
    let second = registry.get_repository(&path.to_uppercase()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(
        &first.source().unwrap(),
        &second.source().unwrap()
    ));
}

#[tokio::test]
async fn grabbed_frame_saves_as_png() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let registry = RepositoryRegistry::new(FfmpegLoader::new());
    let repository = registry.get_repository(path).await.unwrap();
    let event = repository.get_image(2_000_000).await.unwrap();
    let image = repository
        .source()
        .unwrap()
        .frame_image(event.metadata.presented_frames)
        .unwrap();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let output = dir.path().join("frame.png");
    image.save(&output).expect("Failed to save frame");

    let reloaded = image::open(&output).expect("Failed to reopen frame");
    assert_eq!((reloaded.width(), reloaded.height()), (640, 480));
}
