//! image source collaborator
//!
//! decodes a file into a ready-to-blit pixel buffer, scaled down to fit the
//! requested pixel bounds. the canvas treats the result as opaque and
//! immutable.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;

/// a decoded, pre-scaled buffer in X11 ZPixmap layout: BGRx rows on a
/// 32-bit unit, depth 24
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Image {
    /// decode `path`, scaling down to `max_w` x `max_h` pixels while keeping
    /// the aspect ratio; a bound of 0 means unbounded in that dimension
    pub fn load(path: &str, max_w: u32, max_h: u32) -> Result<Image> {
        let decoded = image::open(path).with_context(|| format!("failed to decode {path}"))?;
        Ok(Image::from_decoded(decoded, max_w, max_h))
    }

    fn from_decoded(decoded: DynamicImage, max_w: u32, max_h: u32) -> Image {
        let needs_fit = (max_w > 0 && decoded.width() > max_w)
            || (max_h > 0 && decoded.height() > max_h);
        let decoded = if needs_fit {
            let w = if max_w > 0 { max_w } else { decoded.width() };
            let h = if max_h > 0 { max_h } else { decoded.height() };
            decoded.resize(w, h, FilterType::Triangle)
        } else {
            decoded
        };
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for px in rgba.pixels() {
            let [r, g, b, _a] = px.0;
            data.extend_from_slice(&[b, g, r, 0]);
        }
        Image {
            width,
            height,
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// rows repacked for a destination no larger than `w` x `h`, used when a
    /// surface shrank under the image
    pub fn cropped(&self, w: u32, h: u32) -> Vec<u8> {
        let w = w.min(self.width);
        let h = h.min(self.height);
        if w == self.width && h == self.height {
            return self.data.clone();
        }
        let src_row = (self.width * 4) as usize;
        let dst_row = (w * 4) as usize;
        let mut out = Vec::with_capacity(dst_row * h as usize);
        for row in self.data.chunks_exact(src_row).take(h as usize) {
            out.extend_from_slice(&row[..dst_row]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn checker(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            };
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn test_bgra_layout() {
        let img = Image::from_decoded(checker(2, 1), 0, 0);
        assert_eq!((img.width, img.height), (2, 1));
        // red pixel becomes B,G,R,x = 0,0,255,0
        assert_eq!(&img.data()[0..4], &[0, 0, 255, 0]);
        // blue pixel becomes 255,0,0,0
        assert_eq!(&img.data()[4..8], &[255, 0, 0, 0]);
    }

    #[test]
    fn test_scales_down_to_bounds() {
        let img = Image::from_decoded(checker(100, 50), 40, 0);
        assert_eq!(img.width, 40);
        assert_eq!(img.height, 20); // aspect kept
        assert_eq!(img.data().len(), (40 * 20 * 4) as usize);
    }

    #[test]
    fn test_never_scales_up() {
        let img = Image::from_decoded(checker(10, 10), 400, 400);
        assert_eq!((img.width, img.height), (10, 10));
    }

    #[test]
    fn test_cropped() {
        let img = Image::from_decoded(checker(4, 4), 0, 0);
        let crop = img.cropped(2, 3);
        assert_eq!(crop.len(), 2 * 3 * 4);
        // first pixel unchanged by the crop
        assert_eq!(&crop[0..4], &img.data()[0..4]);
        // crop larger than the image returns the whole buffer
        assert_eq!(img.cropped(10, 10), img.data());
    }
}
