//! RGBA8 frame buffer.
//!
//! Row-major, top-left origin, 4 bytes per pixel, tightly packed
//! (`pitch == width * 4`).  A frame is captured, transformed and presented
//! every cycle; the processor keeps one capture frame and reallocates it
//! only when the source dimensions change.

use std::fmt;

use crate::error::{EngineError, Result};

/// Bytes per RGBA8 pixel.
pub const CHANNELS: usize = 4;

/// A rectangular RGBA8 pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Zero-filled (transparent black) frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; byte_len(width, height)],
        }
    }

    /// Frame filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(byte_len(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap an existing tightly packed RGBA8 buffer.
    ///
    /// # Errors
    ///
    /// [`EngineError::BufferTooSmall`] if the buffer is shorter than
    /// `width * height * 4`, [`EngineError::DimensionMismatch`] if it is longer.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let need = byte_len(width, height);
        if data.len() < need {
            return Err(EngineError::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        if data.len() > need {
            return Err(EngineError::DimensionMismatch(format!(
                "{}x{} RGBA8 frame needs {need} bytes, got {}",
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when the frame holds no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Pixel at `(x, y)`.  Panics when out of bounds, like slice indexing.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Pixel at `(x, y)` with coordinates clamped to the frame edge.
    ///
    /// Must not be called on an empty frame.
    #[inline]
    pub fn pixel_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let cx = x.clamp(0, self.width as i64 - 1) as u32;
        let cy = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixel(cx, cy)
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&rgba);
    }

    /// Resize in place.  Returns `true` when the dimensions changed and the
    /// buffer was reallocated; contents are zeroed in that case and kept
    /// otherwise.
    pub fn resize_to(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(byte_len(width, height), 0);
        true
    }

    /// Copy pixels from a frame of identical dimensions.
    pub fn copy_from(&mut self, other: &Frame) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(EngineError::DimensionMismatch(format!(
                "copy {}x{} into {}x{}",
                other.width, other.height, self.width, self.height
            )));
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[inline]
fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}
