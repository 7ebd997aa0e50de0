//! Internal FFmpeg helpers.
//!
//! Pixel-data copying and timestamp conversion shared by the decoder worker.

use ffmpeg_next::{Rational, frame::Video as VideoFrame};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::configuration::PixelFormat;
use crate::error::SeekframeError;

/// Copy pixel data from a scaled FFmpeg frame into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × bpp).
/// The padding is stripped so the result can be handed to `image` buffers.
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_bytes = width as usize * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_bytes {
        data[..row_bytes * height as usize].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            buffer.extend_from_slice(&data[start..start + row_bytes]);
        }
        buffer
    }
}

/// Convert a scaled frame into an image of the requested pixel format.
pub(crate) fn frame_to_image(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
) -> Result<DynamicImage, SeekframeError> {
    let buffer = frame_to_buffer(video_frame, width, height, pixel_format.bytes_per_pixel());
    let image = match pixel_format {
        PixelFormat::Rgb8 => RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba8 => {
            RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8)
        }
        PixelFormat::Gray8 => {
            GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8)
        }
    };
    image.ok_or_else(|| {
        SeekframeError::VideoDecodeError(
            "Failed to construct image from decoded frame data".to_string(),
        )
    })
}

/// Rescale a PTS value from stream time base to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
}

/// Convert seconds to a container-level seek timestamp (`AV_TIME_BASE`
/// units). Negative positions clamp to zero.
pub(crate) fn seconds_to_seek_timestamp(seconds: f64) -> i64 {
    if !seconds.is_finite() {
        return 0;
    }
    (seconds.max(0.0) * ffmpeg_sys_next::AV_TIME_BASE as f64).round() as i64
}
