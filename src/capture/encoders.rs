//! Built-in encoders.
//!
//! These keep the pipeline runnable without codec plugins: a binary PPM
//! writer for stills and a deflate-compressed frame stream for recordings.

use std::{io::Write, time::Duration};

use flate2::{Compression, write::DeflateEncoder};

use super::{
    dependencies::{StillEncoder, VideoEncoder},
    types::{CaptureError, EncodingMetadata, Frame},
};

pub const FRAME_STREAM_MAGIC: &[u8; 4] = b"CCFS";
pub const FRAME_STREAM_VERSION: u8 = 1;

/// Binary netpbm (P6) still encoder. Alpha is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct PpmEncoder;

impl StillEncoder for PpmEncoder {
    fn metadata(&self, width: u32, height: u32) -> EncodingMetadata {
        EncodingMetadata {
            media_type: "image/x-portable-pixmap".to_string(),
            extension: "ppm".to_string(),
            width,
            height,
        }
    }

    fn encode(&self, frame: &Frame, out: &mut dyn Write) -> Result<(), CaptureError> {
        write!(out, "P6\n{} {}\n255\n", frame.width, frame.height).map_err(encode_error)?;

        let mut row_rgb = Vec::with_capacity(frame.width as usize * 3);
        for y in 0..frame.height {
            let row = frame
                .row(y)
                .ok_or_else(|| CaptureError::Encode(format!("frame is missing row {y}")))?;
            row_rgb.clear();
            for pixel in row.chunks_exact(4) {
                row_rgb.extend_from_slice(&pixel[..3]);
            }
            out.write_all(&row_rgb).map_err(encode_error)?;
        }
        Ok(())
    }
}

/// Simple recording container.
///
/// Layout: magic, version, width and height (u32 LE), then per frame a
/// timestamp in microseconds (u64 LE), a compressed length (u32 LE) and the
/// deflated RGBA rows. The stream ends with a zero timestamp and zero length.
#[derive(Debug)]
pub struct FrameStreamEncoder {
    compression: Compression,
    frames: u64,
    started: bool,
}

impl FrameStreamEncoder {
    pub fn new() -> Self {
        Self {
            compression: Compression::fast(),
            frames: 0,
            started: false,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for FrameStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for FrameStreamEncoder {
    fn metadata(&self, width: u32, height: u32) -> EncodingMetadata {
        EncodingMetadata {
            media_type: "video/x-capturecast-frames".to_string(),
            extension: "ccfs".to_string(),
            width,
            height,
        }
    }

    fn start(&mut self, width: u32, height: u32, out: &mut dyn Write) -> Result<(), CaptureError> {
        if self.started {
            return Err(CaptureError::Encode("encoder already started".into()));
        }
        out.write_all(FRAME_STREAM_MAGIC).map_err(encode_error)?;
        out.write_all(&[FRAME_STREAM_VERSION]).map_err(encode_error)?;
        out.write_all(&width.to_le_bytes()).map_err(encode_error)?;
        out.write_all(&height.to_le_bytes()).map_err(encode_error)?;
        self.started = true;
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &Frame,
        timestamp: Duration,
        out: &mut dyn Write,
    ) -> Result<(), CaptureError> {
        if !self.started {
            return Err(CaptureError::Encode("encoder not started".into()));
        }

        let mut deflate = DeflateEncoder::new(Vec::new(), self.compression);
        for y in 0..frame.height {
            let row = frame
                .row(y)
                .ok_or_else(|| CaptureError::Encode(format!("frame is missing row {y}")))?;
            deflate.write_all(row).map_err(encode_error)?;
        }
        let compressed = deflate.finish().map_err(encode_error)?;
        let length = u32::try_from(compressed.len())
            .map_err(|_| CaptureError::Encode("compressed frame exceeds 4 GiB".into()))?;

        // Zero is the end marker, so the first frame is stamped at least 1µs.
        let micros = u64::try_from(timestamp.as_micros()).unwrap_or(u64::MAX).max(1);
        out.write_all(&micros.to_le_bytes()).map_err(encode_error)?;
        out.write_all(&length.to_le_bytes()).map_err(encode_error)?;
        out.write_all(&compressed).map_err(encode_error)?;
        self.frames += 1;
        Ok(())
    }

    fn end(&mut self, out: &mut dyn Write) -> Result<(), CaptureError> {
        if !self.started {
            return Err(CaptureError::Encode("encoder not started".into()));
        }
        out.write_all(&0u64.to_le_bytes()).map_err(encode_error)?;
        out.write_all(&0u32.to_le_bytes()).map_err(encode_error)?;
        out.flush().map_err(encode_error)?;
        self.started = false;
        log::debug!("Frame stream finished after {} frames", self.frames);
        Ok(())
    }
}

fn encode_error(err: std::io::Error) -> CaptureError {
    CaptureError::Encode(err.to_string())
}
