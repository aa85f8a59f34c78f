use crate::error::{Error, Result};

/// Channel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// One byte per pixel.
    Gray,
    /// Three bytes per pixel in blue, green, red order.
    Bgr,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Bgr => 3,
        }
    }
}

/// A decoded video frame, row-major with no padding between rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::MalformedFrame(format!("zero-sized frame {}x{}", width, height)));
        }
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(Error::MalformedFrame(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                width,
                height,
                layout,
                expected,
                data.len()
            )));
        }
        Ok(Self { width, height, layout, data })
    }

    pub fn bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Bgr, data)
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelLayout::Gray, data)
    }

    /// Build a frame filled with a single BGR color.
    pub fn solid_bgr(width: u32, height: u32, bgr: [u8; 3]) -> Result<Self> {
        let data = bgr.repeat(width as usize * height as usize);
        Self::bgr(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = Frame::bgr(4, 2, vec![0; 4 * 2 * 3 - 1]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Frame::gray(0, 5, Vec::new()).is_err());
    }

    #[test]
    fn solid_frame_repeats_color() {
        let frame = Frame::solid_bgr(2, 1, [1, 2, 3]).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 1, 2, 3]);
        assert_eq!(frame.layout().channels(), 3);
    }
}
