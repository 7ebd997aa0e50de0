//! ImageRepository lifecycle tests.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{ScriptedLoader, initialized_repository};
use seekframe::{FrameSource, ImageRepository, PlaybackMode, SeekframeError};

// ── init ─────────────────────────────────────────────────────────

#[tokio::test]
async fn new_repository_is_uninitialized() {
    let repository = ImageRepository::new("clip.mp4", Arc::new(ScriptedLoader::new()));
    assert!(!repository.is_initialized());
    assert_eq!(repository.mode(), PlaybackMode::Idle);
    assert_eq!(repository.queued_seeks(), 0);
}

#[tokio::test]
async fn operations_before_init_fail_with_not_initialized() {
    let repository = ImageRepository::new("clip.mp4", Arc::new(ScriptedLoader::new()));

    assert_eq!(
        repository.get_image(0).await,
        Err(SeekframeError::NotInitialized)
    );
    assert_eq!(repository.play().await, Err(SeekframeError::NotInitialized));
    assert_eq!(repository.pause(), Err(SeekframeError::NotInitialized));
    assert_eq!(repository.stop().await, Err(SeekframeError::NotInitialized));
    assert!(matches!(
        repository.source(),
        Err(SeekframeError::NotInitialized)
    ));
}

#[tokio::test]
async fn init_is_idempotent() {
    let loader = Arc::new(ScriptedLoader::new());
    let repository = ImageRepository::new("clip.mp4", Arc::clone(&loader));

    repository.init().await.unwrap();
    repository.init().await.unwrap();

    assert!(repository.is_initialized());
    assert_eq!(loader.loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_init_loads_once() {
    let loader = Arc::new(ScriptedLoader::new().with_load_delay(Duration::from_millis(30)));
    let repository = Arc::new(ImageRepository::new("clip.mp4", Arc::clone(&loader)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let repository = Arc::clone(&repository);
            tokio::spawn(async move { repository.init().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn failed_init_stays_uninitialized_and_can_retry() {
    let loader = Arc::new(ScriptedLoader::failing(1));
    let repository = ImageRepository::new("broken.mp4", Arc::clone(&loader));

    let error = repository.init().await.unwrap_err();
    assert!(matches!(error, SeekframeError::SourceLoadFailed { .. }));
    assert!(!repository.is_initialized());

    repository.init().await.unwrap();
    assert!(repository.is_initialized());
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn key_is_normalized_but_loader_sees_original_case() {
    let loader = Arc::new(ScriptedLoader::new());
    let repository = ImageRepository::new("  Videos/Intro.MP4 ", Arc::clone(&loader));
    assert_eq!(repository.key(), "videos/intro.mp4");

    repository.init().await.unwrap();
    assert_eq!(loader.identifiers(), vec!["Videos/Intro.MP4".to_string()]);
}

// ── uninit ───────────────────────────────────────────────────────

#[tokio::test]
async fn uninit_is_idempotent() {
    let repository = initialized_repository().await;
    repository.uninit().await;
    repository.uninit().await;
    assert!(!repository.is_initialized());

    let never_initialized = ImageRepository::new("x", Arc::new(ScriptedLoader::new()));
    never_initialized.uninit().await;
}

#[tokio::test(start_paused = true)]
async fn uninit_rejects_queued_seeks_but_finishes_the_running_one() {
    let repository = initialized_repository().await;

    let running = repository.get_image(2_000_000);
    let queued_a = repository.get_image(1_000_000);
    let queued_b = repository.get_image(3_000_000);

    // Let the first seek start.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    repository.uninit().await;

    assert_eq!(queued_a.await, Err(SeekframeError::QueueStopped));
    assert_eq!(queued_b.await, Err(SeekframeError::QueueStopped));
    assert_eq!(running.await.unwrap().timestamp_us, 2_000_000);
}

#[tokio::test(start_paused = true)]
async fn uninit_while_playing_pauses_and_drops_subscribers() {
    let repository = initialized_repository().await;
    let source = repository.source().unwrap();
    let received = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&received);
    repository.on(move |_| *sink.lock().unwrap() += 1);

    repository.play().await.unwrap();
    repository.uninit().await;

    assert!(!source.is_playing());
    assert_eq!(source.pauses(), 1);
    assert_eq!(source.pending_callbacks(), 0);
    assert_eq!(repository.subscriber_count(), 0);
    assert_eq!(repository.mode(), PlaybackMode::Idle);
    assert_eq!(*received.lock().unwrap(), 0);
}

#[tokio::test]
async fn operations_after_uninit_fail_with_not_initialized() {
    let repository = initialized_repository().await;
    repository.uninit().await;

    assert_eq!(
        repository.get_image(0).await,
        Err(SeekframeError::NotInitialized)
    );
    assert_eq!(repository.play().await, Err(SeekframeError::NotInitialized));
    assert_eq!(repository.pause(), Err(SeekframeError::NotInitialized));
}

#[tokio::test(start_paused = true)]
async fn reinit_after_uninit_loads_a_fresh_source() {
    let loader = Arc::new(ScriptedLoader::new());
    let repository = ImageRepository::new("clip.mp4", Arc::clone(&loader));

    repository.init().await.unwrap();
    repository.uninit().await;
    repository.init().await.unwrap();

    assert_eq!(loader.loads(), 2);
    let event = repository.get_image(500_000).await.unwrap();
    assert_eq!(event.timestamp_us, 500_000);
    assert_eq!(event.metadata.presented_frames, 1);
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subscribing_before_init_is_allowed() {
    let repository = ImageRepository::new("clip.mp4", Arc::new(ScriptedLoader::new()));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let subscription = repository.on(move |event| sink.lock().unwrap().push(event.timestamp_us));
    assert!(subscription.is_active());

    repository.init().await.unwrap();
    repository.play().await.unwrap();
    repository.source().unwrap().tick(0.2);

    assert_eq!(*received.lock().unwrap(), vec![200_000]);
}

#[tokio::test]
async fn debug_output_names_key_and_state() {
    let repository = initialized_repository().await;
    let debug = format!("{repository:?}");
    assert!(debug.contains("clip.mp4"));
    assert!(debug.contains("initialized: true"));
    assert!(debug.contains("Idle"));
}
