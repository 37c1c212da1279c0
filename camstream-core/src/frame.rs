//! Decoded video frame representation

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Pixel layouts produced by capture devices and consumed by tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit blue, green, red (typical webcam output)
    Bgr24,
    /// Packed 8-bit red, green, blue (what streaming tracks emit)
    Rgb24,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 640x480
    pub const VGA: Self = Self::new(640, 480);
    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);

    /// Number of pixels in one frame
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded image captured from a camera.
///
/// Pixel data is immutable once the frame is built, so cloning a frame hands
/// out an independent copy of the handle without any chance of observing a
/// half-written image.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Packed pixel data, `width * height * bytes_per_pixel` bytes
    pub data: Bytes,
    /// Capture sequence number assigned by the device
    pub sequence: u64,
    /// Wall clock capture time in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Monotonic capture time, used for staleness checks
    pub captured_at: Instant,
}

impl VideoFrame {
    /// Build a frame captured now
    pub fn new(
        resolution: Resolution,
        format: PixelFormat,
        data: impl Into<Bytes>,
        sequence: u64,
    ) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            format,
            data: data.into(),
            sequence,
            timestamp: unix_millis(),
            captured_at: Instant::now(),
        }
    }

    /// All-black frame of the given size
    pub fn black(resolution: Resolution, format: PixelFormat) -> Self {
        let len = resolution.pixel_count() * format.bytes_per_pixel();
        Self::new(resolution, format, vec![0u8; len], 0)
    }

    /// Frame dimensions
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Number of bytes a well-formed frame of this size carries
    pub fn expected_len(&self) -> usize {
        self.resolution().pixel_count() * self.format.bytes_per_pixel()
    }

    /// Whether `data` matches the declared dimensions
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }

    /// Whether every pixel is zero
    pub fn is_black(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    /// Convert to packed RGB, swapping channels when needed
    pub fn to_rgb(&self) -> VideoFrame {
        match self.format {
            PixelFormat::Rgb24 => self.clone(),
            PixelFormat::Bgr24 => {
                let mut data = self.data.to_vec();
                for px in data.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                VideoFrame {
                    format: PixelFormat::Rgb24,
                    data: Bytes::from(data),
                    ..self.clone()
                }
            }
        }
    }

    /// Age of the frame relative to now
    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame() {
        let frame = VideoFrame::black(Resolution::new(4, 2), PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 24);
        assert!(frame.is_black());
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let frame = VideoFrame::new(
            Resolution::new(2, 1),
            PixelFormat::Bgr24,
            vec![1u8, 2, 3, 4, 5, 6],
            7,
        );
        let rgb = frame.to_rgb();
        assert_eq!(rgb.format, PixelFormat::Rgb24);
        assert_eq!(&rgb.data[..], &[3, 2, 1, 6, 5, 4]);
        assert_eq!(rgb.sequence, 7);
    }

    #[test]
    fn test_rgb_to_rgb_is_identity() {
        let frame = VideoFrame::new(Resolution::new(1, 1), PixelFormat::Rgb24, vec![9u8, 8, 7], 1);
        assert_eq!(&frame.to_rgb().data[..], &[9, 8, 7]);
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::VGA.to_string(), "640x480");
        assert_eq!(Resolution::HD.pixel_count(), 1280 * 720);
    }
}
