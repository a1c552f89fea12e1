use super::{BoxRect, Canvas, Detection};
use image::Rgba;

pub const BOX_LINE_WIDTH: f32 = 3.5;
pub const BOX_STROKE: Rgba<u8> = Rgba([0, 255, 0, 191]);
pub const BOX_FILL: Rgba<u8> = Rgba([255, 255, 255, 0]);
pub const LABEL_SIZE: (f32, f32) = (75.0, 35.0);
pub const LABEL_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const LABEL_TEXT: Rgba<u8> = Rgba([255, 165, 0, 255]);

/// How boxes from the previous pass are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EraseMode {
    /// Clear the whole canvas before drawing.
    #[default]
    Clear,
    /// Overwrite each previously drawn box with transparent pixels. Boxes
    /// from an update that was coalesced away are never erased this way.
    Overwrite,
}

/// A text label attached at the top-left corner of a drawn box.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelOverlay {
    pub id: u64,
    pub frame: BoxRect,
    pub text: String,
    pub background: Rgba<u8>,
    pub text_color: Rgba<u8>,
}

/// Double-buffered bounding-box state.
///
/// [`update_detections`](Self::update_detections) only flips the buffers and
/// marks the view dirty; the drawing happens in
/// [`render_pass`](Self::render_pass) on the next display refresh, so several
/// updates between two refreshes collapse into one pass over the newest set.
///
/// Boxes lag the live preview: detections describe a frame captured before
/// inference finished.
pub struct DetectionOverlayRenderer {
    pending_erase: Vec<Detection>,
    pending_draw: Vec<Detection>,
    active_labels: Vec<LabelOverlay>,
    needs_display: bool,
    view_size: (u32, u32),
    erase_mode: EraseMode,
    next_label_id: u64,
}

impl DetectionOverlayRenderer {
    pub fn new(view_size: (u32, u32), erase_mode: EraseMode) -> Self {
        Self {
            pending_erase: Vec::new(),
            pending_draw: Vec::new(),
            active_labels: Vec::new(),
            needs_display: false,
            view_size,
            erase_mode,
            next_label_id: 0,
        }
    }

    pub fn update_detections(&mut self, detections: Vec<Detection>) {
        self.pending_erase = std::mem::replace(&mut self.pending_draw, detections);
        self.needs_display = true;
    }

    pub fn needs_display(&self) -> bool {
        self.needs_display
    }

    pub fn view_size(&self) -> (u32, u32) {
        self.view_size
    }

    pub fn active_labels(&self) -> &[LabelOverlay] {
        &self.active_labels
    }

    #[cfg(test)]
    pub fn pending_draw(&self) -> &[Detection] {
        &self.pending_draw
    }

    /// Erase the previous boxes and draw the pending ones onto `canvas`.
    pub fn render_pass(&mut self, canvas: &mut Canvas) {
        let _span = tracing::debug_span!("render_pass").entered();
        self.needs_display = false;

        // Every live label belongs to the previously drawn set.
        let removed = self.active_labels.len();
        self.active_labels.clear();

        if self.erase_mode == EraseMode::Clear {
            canvas.clear();
        }
        if !self.pending_erase.is_empty() {
            if self.erase_mode == EraseMode::Overwrite {
                for detection in &self.pending_erase {
                    canvas.erase_rect(detection.rect_in(self.view_size), BOX_LINE_WIDTH);
                }
            }
            self.pending_erase.clear();
        }

        for detection in &self.pending_draw {
            let rect = detection.rect_in(self.view_size);
            canvas.fill_rect(rect, BOX_FILL);
            canvas.stroke_rect(rect, BOX_STROKE, BOX_LINE_WIDTH);

            self.active_labels.push(LabelOverlay {
                id: self.next_label_id,
                frame: BoxRect {
                    x: rect.x,
                    y: rect.y,
                    width: LABEL_SIZE.0,
                    height: LABEL_SIZE.1,
                },
                text: detection.label.clone(),
                background: LABEL_BACKGROUND,
                text_color: LABEL_TEXT,
            });
            self.next_label_id += 1;
        }

        tracing::debug!(
            removed_labels = removed,
            drawn = self.pending_draw.len(),
            "overlay redrawn"
        );
    }
}
