//! YUV4MPEG2 encode sink
//!
//! Writes uncompressed 4:4:4 frames. Every player that understands y4m (and
//! ffmpeg) can read or transcode the output, and no codec library is needed.

use crate::recording::{EncodeSink, SinkFactory};
use camstream_core::{CamStreamError, PixelFormat, Result, VideoFrame};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Opens [`Y4mSink`]s, creating parent directories as needed
#[derive(Debug, Clone, Default)]
pub struct Y4mSinkFactory;

impl Y4mSinkFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self
    }
}

impl SinkFactory for Y4mSinkFactory {
    fn open(&self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn EncodeSink>> {
        Y4mSink::create(path, fps, width, height).map(|s| Box::new(s) as Box<dyn EncodeSink>)
    }
}

/// A y4m file being written
pub struct Y4mSink {
    path: PathBuf,
    width: u32,
    height: u32,
    writer: BufWriter<File>,
    planes: Vec<u8>,
}

impl Y4mSink {
    /// Create the file and write the stream header
    pub fn create(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        let open_failed = |reason: String| CamStreamError::SinkOpenFailed {
            path: path.to_path_buf(),
            reason,
        };

        if width == 0 || height == 0 || fps <= 0.0 {
            return Err(open_failed(format!(
                "invalid stream format {}x{}@{}",
                width, height, fps
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_failed(e.to_string()))?;
        }

        let file = File::create(path).map_err(|e| open_failed(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        let (num, den) = frame_rate_ratio(fps);
        writeln!(
            writer,
            "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C444",
            width, height, num, den
        )
        .map_err(|e| open_failed(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            writer,
            planes: Vec::with_capacity(width as usize * height as usize * 3),
        })
    }

    fn write_failed(&self, reason: impl Into<String>) -> CamStreamError {
        CamStreamError::SinkWriteFailed {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

impl EncodeSink for Y4mSink {
    fn write(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(self.write_failed(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if !frame.is_well_formed() {
            return Err(self.write_failed("truncated frame data"));
        }

        let pixels = frame.resolution().pixel_count();
        self.planes.clear();
        self.planes.resize(pixels * 3, 0);
        let (y_plane, chroma) = self.planes.split_at_mut(pixels);
        let (u_plane, v_plane) = chroma.split_at_mut(pixels);

        for (i, px) in frame.data.chunks_exact(3).enumerate() {
            let (r, g, b) = match frame.format {
                PixelFormat::Bgr24 => (px[2], px[1], px[0]),
                PixelFormat::Rgb24 => (px[0], px[1], px[2]),
            };
            let (y, u, v) = rgb_to_yuv(r, g, b);
            y_plane[i] = y;
            u_plane[i] = u;
            v_plane[i] = v;
        }

        let result = self
            .writer
            .write_all(b"FRAME\n")
            .and_then(|_| self.writer.write_all(&self.planes));
        result.map_err(|e| self.write_failed(e.to_string()))
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.writer.flush().map_err(|e| CamStreamError::SinkCloseFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// BT.601 full-range conversion
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn frame_rate_ratio(fps: f64) -> (u64, u64) {
    if fps.fract() == 0.0 {
        (fps as u64, 1)
    } else {
        ((fps * 1000.0).round() as u64, 1000)
    }
}
