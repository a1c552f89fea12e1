use image::{Rgb, RgbImage, Rgba, RgbaImage};

/// Pixel layout of frames delivered by the capture output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32 bits per pixel, bytes ordered B, G, R, A.
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }
}

/// An uncompressed captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub const FORMAT: PixelFormat = PixelFormat::Bgra32;

    /// Wrap raw BGRA bytes. Returns `None` if the length does not match.
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * Self::FORMAT.bytes_per_pixel();
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for Rgb([r, g, b]) in image.pixels() {
            data.extend_from_slice(&[*b, *g, *r, 255]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn to_rgba(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let i = (y as usize * self.width as usize + x as usize) * 4;
            let px = &self.data[i..i + 4];
            Rgba([px[2], px[1], px[0], px[3]])
        })
    }
}
