use crate::error::{Result, ShieldError};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in page space: points (1/72 inch), origin top-left, y down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    pub fn overlaps_vertically(&self, other: &Rect) -> bool {
        self.y < other.bottom() && other.y < self.bottom()
    }

    /// Pixel area covering this box, rounded outward and clipped to the bitmap.
    pub fn to_pixels(&self, scale_x: f32, scale_y: f32, width: u32, height: u32) -> Option<PixelRect> {
        if self.is_empty() {
            return None;
        }
        let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min(max as f32) as u32 };
        let r = PixelRect {
            x0: clamp((self.x * scale_x).floor(), width),
            y0: clamp((self.y * scale_y).floor(), height),
            x1: clamp((self.right() * scale_x).ceil(), width),
            y1: clamp((self.bottom() * scale_y).ceil(), height),
        };
        (r.x0 < r.x1 && r.y0 < r.y1).then_some(r)
    }
}

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// RGBA8 page image, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Bitmap {
    pub fn new(width: u32, height: u32, fill: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&fill);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(ShieldError::Adapter(format!(
                "bitmap buffer is {} bytes, expected {expected} for {width}x{height} RGBA",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let o = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[o..o + 4]);
        Some(px)
    }

    /// Overwrite every pixel in `rect` with `color`. No blending.
    pub fn fill_rect(&mut self, rect: &PixelRect, color: [u8; 4]) {
        let x1 = rect.x1.min(self.width);
        let y1 = rect.y1.min(self.height);
        for y in rect.y0..y1 {
            for x in rect.x0..x1 {
                let o = self.offset(x, y);
                self.pixels[o..o + 4].copy_from_slice(&color);
            }
        }
    }

    /// Nearest-neighbour resample.
    pub fn resample(&self, width: u32, height: u32) -> Bitmap {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Bitmap::new(width, height, [0, 0, 0, 0]);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as u32;
                let src = self.offset(sx, sy);
                let dst = out.offset(x, y);
                out.pixels[dst..dst + 4].copy_from_slice(&self.pixels[src..src + 4]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_round_outward_and_clip() {
        let r = Rect::new(1.2, 1.2, 2.0, 2.0);
        let p = r.to_pixels(1.0, 1.0, 100, 100).unwrap();
        assert_eq!(p, PixelRect { x0: 1, y0: 1, x1: 4, y1: 4 });

        let off_page = Rect::new(90.0, 90.0, 50.0, 50.0);
        let p = off_page.to_pixels(1.0, 1.0, 100, 100).unwrap();
        assert_eq!((p.x1, p.y1), (100, 100));

        assert!(Rect::new(200.0, 0.0, 5.0, 5.0)
            .to_pixels(1.0, 1.0, 100, 100)
            .is_none());
    }

    #[test]
    fn union_covers_both() {
        let u = Rect::new(0.0, 0.0, 1.0, 1.0).union(&Rect::new(5.0, 2.0, 1.0, 1.0));
        assert_eq!(u, Rect::new(0.0, 0.0, 6.0, 3.0));
    }

    #[test]
    fn fill_is_opaque_overwrite() {
        let mut bmp = Bitmap::new(4, 4, [255, 255, 255, 255]);
        bmp.fill_rect(&PixelRect { x0: 1, y0: 1, x1: 3, y1: 3 }, [0, 0, 0, 255]);
        assert_eq!(bmp.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(bmp.pixel(2, 2), Some([0, 0, 0, 255]));
        assert_eq!(bmp.pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(bmp.pixel(3, 3), Some([255, 255, 255, 255]));
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(Bitmap::from_raw(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            Bitmap::from_raw(2, 2, vec![0; 15]),
            Err(ShieldError::Adapter(_))
        ));
    }

    #[test]
    fn resample_doubles() {
        let mut bmp = Bitmap::new(2, 1, [255, 255, 255, 255]);
        bmp.fill_rect(&PixelRect { x0: 0, y0: 0, x1: 1, y1: 1 }, [0, 0, 0, 255]);
        let big = bmp.resample(4, 2);
        assert_eq!(big.pixel(1, 1), Some([0, 0, 0, 255]));
        assert_eq!(big.pixel(2, 0), Some([255, 255, 255, 255]));
    }
}
