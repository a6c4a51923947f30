//! Headless readback of a completed frame.

use std::io::{self, Cursor, Read};

/// Tightly packed RGBA8 pixels of one completed frame, readable through
/// [`std::io::Read`].
#[derive(Debug, Clone)]
pub struct RenderTargetStream {
    width: u32,
    height: u32,
    frame: u64,
    cursor: Cursor<Vec<u8>>,
}

impl RenderTargetStream {
    pub(crate) fn new(width: u32, height: u32, frame: u64, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            frame,
            cursor: Cursor::new(pixels),
        }
    }

    /// Width in pixels.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Frame number the pixels belong to.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// All pixels, regardless of how much was read.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    /// RGBA of the pixel at `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * 4;
        let rgba = self.pixels().get(start..start + 4)?;
        Some([rgba[0], rgba[1], rgba[2], rgba[3]])
    }

    /// Takes the pixel buffer.
    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for RenderTargetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_drains_pixels_in_order() {
        let pixels: Vec<u8> = (0..16).collect();
        let mut stream = RenderTargetStream::new(2, 2, 7, pixels.clone());

        let mut head = [0u8; 6];
        stream.read_exact(&mut head).unwrap();
        assert_eq!(head, [0, 1, 2, 3, 4, 5]);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, pixels[6..]);
        assert_eq!(stream.pixels(), pixels.as_slice());
        assert_eq!(stream.frame(), 7);
    }

    #[test]
    fn test_pixel_lookup() {
        let pixels: Vec<u8> = (0..16).collect();
        let stream = RenderTargetStream::new(2, 2, 0, pixels);
        assert_eq!(stream.pixel(1, 1), Some([12, 13, 14, 15]));
        assert_eq!(stream.pixel(2, 0), None);
    }
}
