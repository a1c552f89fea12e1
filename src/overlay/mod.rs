//! Bounding-box overlay drawn over the video preview.

mod canvas;
mod compositor;
mod context;
mod renderer;

pub use canvas::Canvas;
pub use compositor::Compositor;
pub use context::{RenderContext, RenderHandle, RenderState};
pub use renderer::{DetectionOverlayRenderer, EraseMode, LabelOverlay};

use serde::{Deserialize, Serialize};

/// A detected object. Coordinates are normalized to the previewed frame;
/// producers do not guarantee `left < right` or `top < bottom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(default)]
    pub score: f32,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Detection {
    /// Pixel rectangle of this detection in a view of `size`.
    pub fn rect_in(&self, size: (u32, u32)) -> BoxRect {
        let (w, h) = (size.0 as f32, size.1 as f32);
        BoxRect {
            x: self.left * w,
            y: self.top * h,
            width: (self.right - self.left) * w,
            height: (self.bottom - self.top) * h,
        }
    }
}

/// Rectangle in view pixels. Width and height may be zero or negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoxRect {
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Grow every edge by `amount`.
    pub fn inflate(&self, amount: f32) -> BoxRect {
        BoxRect {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + 2.0 * amount,
            height: self.height + 2.0 * amount,
        }
    }

    fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}
