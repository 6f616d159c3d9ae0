use crate::capture::{
    dependencies::{CaptureSource, SourceProvider},
    types::{CaptureError, Frame},
};

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 360;

/// Opens [`PatternSource`]s of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct PatternSourceProvider {
    pub width: u32,
    pub height: u32,
}

impl PatternSourceProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for PatternSourceProvider {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl SourceProvider for PatternSourceProvider {
    fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Source(format!(
                "invalid region {}x{}",
                self.width, self.height
            )));
        }
        Ok(Box::new(PatternSource::new(self.width, self.height)))
    }
}

/// Synthetic source producing a gradient that scrolls one pixel per frame.
///
/// Output is deterministic for a given size and frame index.
#[derive(Debug)]
pub struct PatternSource {
    width: u32,
    height: u32,
    frame_index: u32,
    outstanding: bool,
    disposed: bool,
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_index: 0,
            outstanding: false,
            disposed: false,
        }
    }
}

impl CaptureSource for PatternSource {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn acquire_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.disposed {
            return Err(CaptureError::Source("source already disposed".into()));
        }
        if self.outstanding {
            log::trace!("Previous pattern frame was not released");
        }

        let shift = self.frame_index;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let r = ((x.wrapping_add(shift)) * 255 / self.width.max(1)) as u8;
                let g = (y * 255 / self.height.max(1)) as u8;
                let b = ((x ^ y) & 0xff) as u8;
                data.extend_from_slice(&[r, g, b, 0xff]);
            }
        }

        self.frame_index = self.frame_index.wrapping_add(1) % self.width.max(1);
        self.outstanding = true;
        Ok(Frame::new(self.width, self.height, data))
    }

    fn release_frame(&mut self) {
        self.outstanding = false;
    }

    fn dispose(&mut self) {
        if !self.disposed {
            log::debug!("Disposing pattern source {}x{}", self.width, self.height);
            self.disposed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_requested_size() {
        let mut source = PatternSourceProvider::new(8, 4).open().unwrap();
        let frame = source.acquire_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data.len(), 8 * 4 * 4);
        assert_eq!(source.size(), (8, 4));
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = PatternSource::new(16, 2);
        let first = source.acquire_frame().unwrap();
        source.release_frame();
        let second = source.acquire_frame().unwrap();
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn disposed_source_stops_producing() {
        let mut source = PatternSource::new(2, 2);
        source.dispose();
        assert!(matches!(
            source.acquire_frame(),
            Err(CaptureError::Source(_))
        ));
    }

    #[test]
    fn empty_region_is_rejected() {
        assert!(PatternSourceProvider::new(0, 10).open().is_err());
    }
}
