use super::BoxRect;
use image::{Rgba, RgbaImage};

/// RGBA drawing surface for the overlay.
///
/// Pixels are covered when their centre lies inside a shape.
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    /// A fully transparent canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    /// Blend `color` over the interior of `rect`.
    pub fn fill_rect(&mut self, rect: BoxRect, color: Rgba<u8>) {
        if rect.is_empty() || color[3] == 0 {
            return;
        }
        self.for_each_covered(rect, |_, _| true, |px| blend(px, color));
    }

    /// Blend an outline of `line_width` centred on the edges of `rect`.
    pub fn stroke_rect(&mut self, rect: BoxRect, color: Rgba<u8>, line_width: f32) {
        if rect.is_empty() || color[3] == 0 {
            return;
        }
        let half = line_width / 2.0;
        let inner = rect.inflate(-half);
        self.for_each_covered(
            rect.inflate(half),
            |px, py| inner.is_empty() || !inner.contains(px, py),
            |px| blend(px, color),
        );
    }

    /// Replace everything a fill plus stroke of `rect` could have covered with
    /// transparent pixels.
    pub fn erase_rect(&mut self, rect: BoxRect, line_width: f32) {
        if rect.is_empty() {
            return;
        }
        self.for_each_covered(
            rect.inflate(line_width / 2.0),
            |_, _| true,
            |px| *px = Rgba([0, 0, 0, 0]),
        );
    }

    fn for_each_covered(
        &mut self,
        area: BoxRect,
        keep: impl Fn(f32, f32) -> bool,
        mut paint: impl FnMut(&mut Rgba<u8>),
    ) {
        let (w, h) = self.image.dimensions();
        let x0 = area.x.floor().max(0.0) as u32;
        let y0 = area.y.floor().max(0.0) as u32;
        let x1 = ((area.x + area.width).ceil().max(0.0) as u32).min(w);
        let y1 = ((area.y + area.height).ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
                if area.contains(cx, cy) && keep(cx, cy) {
                    paint(self.image.get_pixel_mut(x, y));
                }
            }
        }
    }
}

impl From<RgbaImage> for Canvas {
    fn from(image: RgbaImage) -> Self {
        Self { image }
    }
}

/// Source-over blend of non-premultiplied RGBA.
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    *dst = Rgba(out);
}
