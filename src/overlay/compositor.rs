use super::{BoxRect, Canvas, LabelOverlay};
use crate::capture::PixelBuffer;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

/// Glyph cells are 8x8, drawn at twice that size.
const GLYPH_SCALE: f32 = 2.0;
const GLYPH_CELL: f32 = 8.0 * GLYPH_SCALE;
const LABEL_PADDING: f32 = 4.0;

/// Lays the overlay and its labels over a preview frame.
pub struct Compositor {
    width: u32,
    height: u32,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale `preview` to the view size and draw the overlay on top. Without a
    /// preview frame the background is black.
    ///
    /// Labels are drawn last: background first, then the text in an 8x8
    /// bitmap font, clipped to the label frame.
    pub fn compose(
        &self,
        preview: Option<&PixelBuffer>,
        overlay: &Canvas,
        labels: &[LabelOverlay],
    ) -> RgbImage {
        let _span = tracing::debug_span!("compose").entered();

        let mut base = match preview {
            Some(frame) => {
                let rgba = frame.to_rgba();
                if rgba.dimensions() != (self.width, self.height) {
                    imageops::resize(&rgba, self.width, self.height, FilterType::Triangle)
                } else {
                    rgba
                }
            }
            None => RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255])),
        };

        imageops::overlay(&mut base, overlay.image(), 0, 0);

        let mut canvas = Canvas::from(base);
        for label in labels {
            canvas.fill_rect(label.frame, label.background);
            draw_label_text(&mut canvas, label);
        }

        DynamicImage::ImageRgba8(canvas.into_image()).to_rgb8()
    }
}

/// Left-aligned, vertically centred. Glyphs that would cross the right edge
/// of the frame are dropped, as are characters the font lacks.
fn draw_label_text(canvas: &mut Canvas, label: &LabelOverlay) {
    let frame = label.frame;
    let top = frame.y + ((frame.height - GLYPH_CELL) / 2.0).max(0.0);
    let right = frame.x + frame.width;
    let bottom = frame.y + frame.height;

    let mut left = frame.x + LABEL_PADDING;
    for ch in label.text.chars() {
        if left + GLYPH_CELL > right {
            break;
        }
        if let Some(glyph) = BASIC_FONTS.get(ch) {
            for (row, bits) in glyph.iter().enumerate() {
                let y = top + row as f32 * GLYPH_SCALE;
                if y + GLYPH_SCALE > bottom {
                    break;
                }
                for col in 0..8 {
                    if bits & (1 << col) != 0 {
                        let cell = BoxRect {
                            x: left + col as f32 * GLYPH_SCALE,
                            y,
                            width: GLYPH_SCALE,
                            height: GLYPH_SCALE,
                        };
                        canvas.fill_rect(cell, label.text_color);
                    }
                }
            }
        }
        left += GLYPH_CELL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::renderer::{LABEL_BACKGROUND, LABEL_TEXT};
    use crate::overlay::BoxRect;
    use image::Rgb;

    #[test]
    fn preview_is_scaled_and_overlay_blended() {
        let mut frame = image::RgbImage::new(2, 2);
        for px in frame.pixels_mut() {
            *px = Rgb([0, 0, 200]);
        }
        let preview = PixelBuffer::from_rgb(&frame);

        let mut overlay = Canvas::new(8, 8);
        overlay.fill_rect(
            BoxRect {
                x: 0.0,
                y: 0.0,
                width: 2.0,
                height: 2.0,
            },
            Rgba([255, 0, 0, 255]),
        );

        let out = Compositor::new(8, 8).compose(Some(&preview), &overlay, &[]);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
        let Rgb([r, g, b]) = *out.get_pixel(6, 6);
        assert_eq!((r, g), (0, 0));
        assert!((199..=201).contains(&b));
    }

    #[test]
    fn label_background_is_drawn() {
        let overlay = Canvas::new(100, 100);
        let label = LabelOverlay {
            id: 0,
            frame: BoxRect {
                x: 10.0,
                y: 10.0,
                width: 75.0,
                height: 35.0,
            },
            text: "cup".into(),
            background: LABEL_BACKGROUND,
            text_color: LABEL_TEXT,
        };

        let out = Compositor::new(100, 100).compose(None, &overlay, &[label]);
        assert_eq!(out.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(84, 44), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(85, 45), &Rgb([0, 0, 0]));
    }

    fn label_at(x: f32, y: f32, text: &str) -> LabelOverlay {
        LabelOverlay {
            id: 0,
            frame: BoxRect {
                x,
                y,
                width: 75.0,
                height: 35.0,
            },
            text: text.into(),
            background: LABEL_BACKGROUND,
            text_color: LABEL_TEXT,
        }
    }

    fn orange_pixels(out: &RgbImage) -> Vec<(u32, u32)> {
        let orange = Rgb([LABEL_TEXT[0], LABEL_TEXT[1], LABEL_TEXT[2]]);
        out.enumerate_pixels()
            .filter(|(_, _, px)| **px == orange)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn label_text_is_drawn_in_text_colour() {
        let overlay = Canvas::new(100, 100);
        let out = Compositor::new(100, 100).compose(None, &overlay, &[label_at(10.0, 10.0, "cup")]);

        let text = orange_pixels(&out);
        assert!(!text.is_empty());
        assert!(text
            .iter()
            .all(|&(x, y)| (10..85).contains(&x) && (10..45).contains(&y)));
        // The padding around the text keeps the background.
        assert_eq!(out.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(12, 27), &Rgb([255, 255, 255]));
    }

    #[test]
    fn long_label_text_is_clipped_to_frame() {
        let overlay = Canvas::new(200, 100);
        let out = Compositor::new(200, 100).compose(
            None,
            &overlay,
            &[label_at(10.0, 10.0, "refrigerator")],
        );

        let text = orange_pixels(&out);
        assert!(!text.is_empty());
        assert!(text.iter().all(|&(x, _)| x < 85));
    }

    #[test]
    fn blank_label_text_leaves_background() {
        let overlay = Canvas::new(100, 100);
        let out = Compositor::new(100, 100).compose(None, &overlay, &[label_at(10.0, 10.0, "  ")]);
        assert!(orange_pixels(&out).is_empty());
    }
}
