use serde::{Deserialize, Serialize};

/// Interleaved 8-bit pixel layouts understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// Image size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Declared shape of every image of one camera channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: usize,
    pub height: usize,
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    pub fn new(width: usize, height: usize, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.width * self.pixel_format.bytes_per_pixel()
    }

    /// Byte length of one image, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.row_bytes().checked_mul(self.height)
    }
}

/// Borrowed row-major interleaved image.
#[derive(Clone, Copy, Debug)]
pub struct FrameImageView<'a> {
    pub format: FrameFormat,
    pub data: &'a [u8], // len = width * height * bpp
}

/// Owned row-major interleaved image.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameImage {
    pub format: FrameFormat,
    pub data: Vec<u8>,
}

impl FrameImage {
    /// Zero-filled image of the given format.
    pub fn new(format: FrameFormat) -> Self {
        let len = format.byte_len().unwrap_or(0);
        Self {
            format,
            data: vec![0; len],
        }
    }

    /// Image with every byte set to `value`.
    pub fn filled(format: FrameFormat, value: u8) -> Self {
        let len = format.byte_len().unwrap_or(0);
        Self {
            format,
            data: vec![value; len],
        }
    }

    pub fn view(&self) -> FrameImageView<'_> {
        FrameImageView {
            format: self.format,
            data: &self.data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.format.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.format.height
    }

    /// `true` if the buffer length matches the declared format.
    pub fn is_consistent(&self) -> bool {
        self.format.byte_len() == Some(self.data.len())
    }

    /// Copy pixels from `src` without reallocating. Returns `false` (and
    /// leaves `self` untouched) if the formats differ.
    pub fn copy_pixels_from(&mut self, src: &FrameImage) -> bool {
        if self.format != src.format || self.data.len() != src.data.len() {
            return false;
        }
        self.data.copy_from_slice(&src.data);
        true
    }

    /// Flip in place.
    pub fn apply_flip(&mut self, flip: Flip) {
        let bpp = self.format.pixel_format.bytes_per_pixel();
        let row = self.format.row_bytes();
        let (w, h) = (self.format.width, self.format.height);
        if row == 0 || h == 0 {
            return;
        }
        if flip.vertical {
            for y in 0..h / 2 {
                let (top, bottom) = self.data.split_at_mut((h - 1 - y) * row);
                top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
            }
        }
        if flip.horizontal {
            for line in self.data.chunks_exact_mut(row) {
                for x in 0..w / 2 {
                    let (a, b) = (x * bpp, (w - 1 - x) * bpp);
                    for c in 0..bpp {
                        line.swap(a + c, b + c);
                    }
                }
            }
        }
    }
}

impl Clone for FrameImage {
    fn clone(&self) -> Self {
        Self {
            format: self.format,
            data: self.data.clone(),
        }
    }

    // Reuses the existing allocation; the worker handoff relies on this.
    fn clone_from(&mut self, source: &Self) {
        self.format = source.format;
        self.data.clone_from(&source.data);
    }
}

/// Where the first row and column of a source image sit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    /// Columns run right-to-left.
    #[serde(default)]
    pub mirrored: bool,
    /// Rows run bottom-to-top.
    #[serde(default)]
    pub upside_down: bool,
}

impl Orientation {
    pub const TOP_LEFT: Orientation = Orientation {
        mirrored: false,
        upside_down: false,
    };
    pub const BOTTOM_LEFT: Orientation = Orientation {
        mirrored: false,
        upside_down: true,
    };
}

/// Flip over zero, one or both axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flip {
    #[serde(default)]
    pub horizontal: bool,
    #[serde(default)]
    pub vertical: bool,
}

impl Flip {
    pub const NONE: Flip = Flip {
        horizontal: false,
        vertical: false,
    };

    /// Flip that brings images laid out as `source` into the `target` layout.
    pub fn between(source: Orientation, target: Orientation) -> Self {
        Self {
            horizontal: source.mirrored != target.mirrored,
            vertical: source.upside_down != target.upside_down,
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.horizontal && !self.vertical
    }

    /// Number of axes flipped (0, 1 or 2).
    pub fn axes(&self) -> usize {
        usize::from(self.horizontal) + usize::from(self.vertical)
    }
}

#[inline]
fn get_channel(src: &FrameImageView<'_>, x: i32, y: i32, c: usize) -> u8 {
    let f = src.format;
    if x < 0 || y < 0 || x >= f.width as i32 || y >= f.height as i32 {
        return 0;
    }
    let bpp = f.pixel_format.bytes_per_pixel();
    src.data[y as usize * f.row_bytes() + x as usize * bpp + c]
}

/// Bilinear sample of channel `c`; pixels outside the image read as zero.
#[inline]
pub fn sample_bilinear(src: &FrameImageView<'_>, x: f32, y: f32, c: usize) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_channel(src, x0, y0, c) as f32;
    let p10 = get_channel(src, x0 + 1, y0, c) as f32;
    let p01 = get_channel(src, x0, y0 + 1, c) as f32;
    let p11 = get_channel(src, x0 + 1, y0 + 1, c) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &FrameImageView<'_>, x: f32, y: f32, c: usize) -> u8 {
    sample_bilinear(src, x, y, c).round().clamp(0.0, 255.0) as u8
}

/// Nearest-neighbour sample of channel `c`; pixels outside the image read as zero.
#[inline]
pub fn sample_nearest(src: &FrameImageView<'_>, x: f32, y: f32, c: usize) -> u8 {
    get_channel(src, x.round() as i32, y.round() as i32, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize, format: PixelFormat) -> FrameImage {
        let f = FrameFormat::new(width, height, format);
        let data = (0..f.byte_len().unwrap()).map(|i| i as u8).collect();
        FrameImage { format: f, data }
    }

    #[test]
    fn byte_len_follows_pixel_format() {
        let f = FrameFormat::new(64, 64, PixelFormat::Rgb24);
        assert_eq!(f.row_bytes(), 192);
        assert_eq!(f.byte_len(), Some(64 * 64 * 3));
        assert!(FrameImage::new(f).is_consistent());
    }

    #[test]
    fn vertical_flip_swaps_rows() {
        let mut img = ramp(2, 3, PixelFormat::Gray8);
        img.apply_flip(Flip {
            horizontal: false,
            vertical: true,
        });
        assert_eq!(img.data, vec![4, 5, 2, 3, 0, 1]);
    }

    #[test]
    fn horizontal_flip_keeps_pixel_channels_together() {
        let mut img = ramp(3, 1, PixelFormat::Rgb24);
        img.apply_flip(Flip {
            horizontal: true,
            vertical: false,
        });
        assert_eq!(img.data, vec![6, 7, 8, 3, 4, 5, 0, 1, 2]);
    }

    #[test]
    fn double_flip_is_identity() {
        let original = ramp(5, 4, PixelFormat::Rgba32);
        let both = Flip {
            horizontal: true,
            vertical: true,
        };
        let mut img = original.clone();
        img.apply_flip(both);
        assert_ne!(img, original);
        img.apply_flip(both);
        assert_eq!(img, original);
    }

    #[test]
    fn flip_between_orientations() {
        let f = Flip::between(Orientation::BOTTOM_LEFT, Orientation::TOP_LEFT);
        assert_eq!(f.axes(), 1);
        assert!(f.vertical);
        assert!(Flip::between(Orientation::TOP_LEFT, Orientation::TOP_LEFT).is_identity());
        let mirrored_upside_down = Orientation {
            mirrored: true,
            upside_down: true,
        };
        assert_eq!(Flip::between(mirrored_upside_down, Orientation::TOP_LEFT).axes(), 2);
    }

    #[test]
    fn bilinear_interpolates_per_channel() {
        let f = FrameFormat::new(2, 1, PixelFormat::Rgb24);
        let img = FrameImage {
            format: f,
            data: vec![0, 100, 200, 100, 200, 0],
        };
        let v = img.view();
        assert_eq!(sample_bilinear_u8(&v, 0.5, 0.0, 0), 50);
        assert_eq!(sample_bilinear_u8(&v, 0.5, 0.0, 1), 150);
        assert_eq!(sample_bilinear_u8(&v, 0.5, 0.0, 2), 100);
        assert_eq!(sample_nearest(&v, -3.0, 0.0, 0), 0);
    }

    #[test]
    fn clone_from_reuses_buffer() {
        let src = FrameImage::filled(FrameFormat::new(4, 4, PixelFormat::Gray8), 7);
        let mut dst = FrameImage::new(src.format);
        let ptr = dst.data.as_ptr();
        dst.clone_from(&src);
        assert_eq!(dst, src);
        assert_eq!(dst.data.as_ptr(), ptr);
    }
}
