// THEORY:
// The `FrameRenderer` turns "frame N" into pixels on the overlay. It is the
// only writer of the surface.
//
// Key architectural principles:
// 1.  **Clear First**: Every render starts by erasing the surface, so the
//     overlay reflects exactly one frame and rendering the same frame twice
//     gives the same picture.
// 2.  **Batched Passes**: All boxes are drawn first, then all label
//     backgrounds, then all label texts. Grouping by operation instead of by
//     detection keeps style switches to three per frame, and it also means
//     no box can be painted over another detection's label.
// 3.  **Stateless**: The renderer holds only its style. Counters and log
//     bookkeeping that follow a render belong to the engine.

use crate::core_modules::detection::{BoundingBox, ClassLabel, DetectionRecord};
use crate::core_modules::frame_lookup::FrameLookup;
use crate::core_modules::surface::{BoxStyle, Color, OverlaySurface, PixelRect};
use serde::{Deserialize, Serialize};

/// How far past the surface edge a box may reach once snapped to pixels.
/// Wider than any outline, so clipped edges stay off-surface.
const CLIP_MARGIN: f64 = 256.0;

/// Colours and spacing for every class the overlay knows about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub pothole: BoxStyle,
    pub signboard: BoxStyle,
    pub other: BoxStyle,
    pub label_text: Color,
    /// Space between label text and the edge of its background.
    pub label_padding: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            pothole: BoxStyle::outlined(Color::rgba(230, 57, 70, 255), 51, 2),
            signboard: BoxStyle::outlined(Color::rgba(29, 111, 214, 255), 51, 2),
            other: BoxStyle::outlined(Color::rgba(244, 162, 38, 255), 51, 2),
            label_text: Color::WHITE,
            label_padding: 3,
        }
    }
}

impl OverlayStyle {
    pub fn for_class(&self, class: &ClassLabel) -> &BoxStyle {
        match class {
            ClassLabel::Pothole => &self.pothole,
            ClassLabel::Signboard => &self.signboard,
            ClassLabel::Other(_) => &self.other,
        }
    }
}

/// What a render put on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RenderOutcome {
    pub frame: u64,
    pub detection_count: usize,
}

struct LabelLayout {
    text: String,
    background: PixelRect,
    background_color: Color,
    text_x: i32,
    text_y: i32,
}

#[derive(Debug, Clone, Default)]
pub struct FrameRenderer {
    style: OverlayStyle,
}

impl FrameRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Clears `surface` and draws every detection of `frame`.
    pub fn render<S: OverlaySurface + ?Sized>(
        &self,
        surface: &mut S,
        frame: u64,
        lookup: &FrameLookup,
    ) -> RenderOutcome {
        surface.clear();
        let detections = lookup.detections_at(frame);
        let size = surface.size();

        for detection in detections {
            surface.draw_box(
                box_rect(&detection.bounding_box, size),
                self.style.for_class(&detection.class_label),
            );
        }

        let labels: Vec<LabelLayout> = detections
            .iter()
            .map(|detection| self.layout_label(&*surface, size, detection))
            .collect();

        for label in &labels {
            surface.fill_label_background(label.background, label.background_color);
        }
        for label in &labels {
            surface.draw_text(label.text_x, label.text_y, &label.text, self.style.label_text);
        }

        RenderOutcome {
            frame,
            detection_count: detections.len(),
        }
    }

    /// Places the label just above the box, or inside its top edge when
    /// there is no room above.
    fn layout_label<S: OverlaySurface + ?Sized>(
        &self,
        surface: &S,
        size: (u32, u32),
        detection: &DetectionRecord,
    ) -> LabelLayout {
        let text = detection.label_text();
        let (text_width, text_height) = surface.measure_text(&text);
        let padding = self.style.label_padding;
        let width = text_width.saturating_add(padding.saturating_mul(2));
        let height = text_height.saturating_add(padding.saturating_mul(2));

        let anchor = box_rect(&detection.bounding_box, size);
        let above = i64::from(anchor.y) - i64::from(height);
        let y = if above >= 0 { to_i32(above) } else { anchor.y.max(0) };
        let inset = i32::try_from(padding).unwrap_or(i32::MAX);

        LabelLayout {
            text,
            background: PixelRect::new(anchor.x, y, width, height),
            background_color: self.style.for_class(&detection.class_label).stroke,
            text_x: anchor.x.saturating_add(inset),
            text_y: y.saturating_add(inset),
        }
    }
}

/// Snaps a detection box onto whole pixels, clipped to `CLIP_MARGIN` around
/// a surface of `size`; never narrower than one pixel.
fn box_rect(bbox: &BoundingBox, (width, height): (u32, u32)) -> PixelRect {
    let clip = |v: f32, extent: u32| f64::from(v).clamp(-CLIP_MARGIN, f64::from(extent) + CLIP_MARGIN);
    let x1 = clip(bbox.x1, width).floor() as i64;
    let y1 = clip(bbox.y1, height).floor() as i64;
    let x2 = clip(bbox.x2, width).ceil() as i64;
    let y2 = clip(bbox.y2, height).ceil() as i64;
    PixelRect::new(to_i32(x1), to_i32(y1), span(x1, x2), span(y1, y2))
}

fn to_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn span(start: i64, end: i64) -> u32 {
    (end - start).clamp(1, i64::from(u32::MAX)) as u32
}
