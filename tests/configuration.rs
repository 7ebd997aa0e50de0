//! RepositoryOptions, RegistryOptions, FrameOutputOptions, and PixelFormat
//! tests.

use seekframe::{
    FrameOutputOptions, InitFailurePolicy, PixelFormat, RegistryOptions, RepositoryOptions,
};

// ── RepositoryOptions ────────────────────────────────────────────

#[test]
fn repository_options_defaults() {
    let options = RepositoryOptions::new();
    assert_eq!(options.stream_capacity(), 8);
    assert_eq!(options, RepositoryOptions::default());
}

#[test]
fn stream_capacity_clamps_zero() {
    let options = RepositoryOptions::new().with_stream_capacity(0);
    assert_eq!(options.stream_capacity(), 1);
}

// ── RegistryOptions ──────────────────────────────────────────────

#[test]
fn registry_options_default_to_evict() {
    let options = RegistryOptions::new();
    assert_eq!(options.failure_policy(), InitFailurePolicy::Evict);
    assert_eq!(options.repository_options(), &RepositoryOptions::default());
}

#[test]
fn registry_options_builder() {
    let options = RegistryOptions::new()
        .with_failure_policy(InitFailurePolicy::Cache)
        .with_repository_options(RepositoryOptions::new().with_stream_capacity(64));

    assert_eq!(options.failure_policy(), InitFailurePolicy::Cache);
    assert_eq!(options.repository_options().stream_capacity(), 64);

    let debug = format!("{options:?}");
    assert!(debug.contains("Cache"));
    assert!(debug.contains("stream_capacity: 64"));
}

// ── PixelFormat ──────────────────────────────────────────────────

#[test]
fn pixel_format_bytes_per_pixel() {
    assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
    assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    assert_eq!(PixelFormat::Gray8.bytes_per_pixel(), 1);
    assert_eq!(PixelFormat::default(), PixelFormat::Rgb8);
}

// ── FrameOutputOptions ───────────────────────────────────────────

#[test]
fn output_defaults_keep_source_resolution() {
    let options = FrameOutputOptions::new();
    assert_eq!(options.pixel_format, PixelFormat::Rgb8);
    assert!(options.maintain_aspect_ratio);
    assert_eq!(options.resolve_dimensions(1920, 1080), (1920, 1080));
}

#[test]
fn output_width_only_keeps_aspect_ratio() {
    let options = FrameOutputOptions::new().with_resolution(Some(640), None);
    assert_eq!(options.resolve_dimensions(1920, 1080), (640, 360));
}

#[test]
fn output_height_only_keeps_aspect_ratio() {
    let options = FrameOutputOptions::new().with_resolution(None, Some(240));
    assert_eq!(options.resolve_dimensions(320, 240), (320, 240));
    assert_eq!(options.resolve_dimensions(640, 480), (320, 240));
}

#[test]
fn output_single_dimension_without_aspect_ratio() {
    let options = FrameOutputOptions::new()
        .with_resolution(Some(100), None)
        .with_maintain_aspect_ratio(false);
    assert_eq!(options.resolve_dimensions(1920, 1080), (100, 1080));
}

#[test]
fn output_both_dimensions_are_exact() {
    let options = FrameOutputOptions::new()
        .with_pixel_format(PixelFormat::Gray8)
        .with_resolution(Some(64), Some(64));
    assert_eq!(options.resolve_dimensions(1920, 1080), (64, 64));
    assert_eq!(options.pixel_format, PixelFormat::Gray8);
}

#[test]
fn output_tiny_scale_never_reaches_zero() {
    let options = FrameOutputOptions::new().with_resolution(Some(1), None);
    assert_eq!(options.resolve_dimensions(1920, 10), (1, 1));
}
