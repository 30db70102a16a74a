// THEORY:
// The `surface` module defines the drawable layer that sits on top of the
// video. The video pixels are never touched: everything the engine shows is
// drawn onto an `OverlaySurface`, which the renderer owns exclusively.
//
// The trait is deliberately small: clear, a box (outline plus translucent
// fill), a label background, a line of text, and text measurement for label
// layout. Two implementations ship with the crate:
// - `RgbaSurface` rasterises into an `image::RgbaImage` using `imageproc` for
//   rectangles and `rusttype` for text, and can encode itself as PNG.
// - `RecordingSurface` keeps the ordered list of draw calls instead of pixels,
//   which makes the renderer's contract (clear first, three batched passes)
//   directly observable.

use crate::error::{OverlayError, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale, point};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn to_pixel(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

/// An integer rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Shrinks the rectangle by `amount` on every side, if anything is left.
    pub fn inset(&self, amount: u32) -> Option<PixelRect> {
        let shrink = amount.checked_mul(2)?;
        if self.width <= shrink || self.height <= shrink {
            return None;
        }
        let step = i32::try_from(amount).ok()?;
        Some(PixelRect {
            x: self.x.saturating_add(step),
            y: self.y.saturating_add(step),
            width: self.width - shrink,
            height: self.height - shrink,
        })
    }

    /// Trims the extent so the far edge stays inside `i32`.
    fn to_rect(self) -> Option<Rect> {
        let room = |origin: i32| u32::try_from(i64::from(i32::MAX) - i64::from(origin.max(0))).unwrap_or(0);
        let width = self.width.min(room(self.x));
        let height = self.height.min(room(self.y));
        (width > 0 && height > 0).then(|| Rect::at(self.x, self.y).of_size(width, height))
    }
}

/// How one class of detection is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxStyle {
    pub stroke: Color,
    /// Translucent interior fill.
    pub fill: Color,
    pub line_width: u32,
}

impl BoxStyle {
    pub const fn outlined(stroke: Color, fill_alpha: u8, line_width: u32) -> Self {
        Self {
            stroke,
            fill: stroke.with_alpha(fill_alpha),
            line_width,
        }
    }
}

pub trait OverlaySurface {
    /// Width and height in pixels.
    fn size(&self) -> (u32, u32);
    /// Erases everything previously drawn.
    fn clear(&mut self);
    fn draw_box(&mut self, rect: PixelRect, style: &BoxStyle);
    fn fill_label_background(&mut self, rect: PixelRect, color: Color);
    /// Draws `text` with its top-left corner at `(x, y)`.
    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Color);
    /// Width and height `text` would occupy.
    fn measure_text(&self, text: &str) -> (u32, u32);
}

/// One recorded call on a `RecordingSurface`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear,
    Box {
        rect: PixelRect,
        stroke: Color,
        fill: Color,
        line_width: u32,
    },
    LabelBackground {
        rect: PixelRect,
        color: Color,
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        color: Color,
    },
}

/// A surface that remembers draw calls since the last clear.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
    clears: usize,
    char_width: u32,
    line_height: u32,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
            clears: 0,
            char_width: 7,
            line_height: 14,
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn clear_count(&self) -> usize {
        self.clears
    }

    /// True when nothing but the clear has been drawn.
    pub fn is_blank(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, DrawOp::Clear))
    }

    pub fn boxes(&self) -> Vec<PixelRect> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Box { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl OverlaySurface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(DrawOp::Clear);
        self.clears += 1;
    }

    fn draw_box(&mut self, rect: PixelRect, style: &BoxStyle) {
        self.ops.push(DrawOp::Box {
            rect,
            stroke: style.stroke,
            fill: style.fill,
            line_width: style.line_width,
        });
    }

    fn fill_label_background(&mut self, rect: PixelRect, color: Color) {
        self.ops.push(DrawOp::LabelBackground { rect, color });
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Color) {
        self.ops.push(DrawOp::Text {
            x,
            y,
            text: text.to_string(),
            color,
        });
    }

    fn measure_text(&self, text: &str) -> (u32, u32) {
        (text.chars().count() as u32 * self.char_width, self.line_height)
    }
}

/// A transparent RGBA raster overlay.
pub struct RgbaSurface {
    image: RgbaImage,
    font: Option<Font<'static>>,
    font_px: f32,
}

impl RgbaSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            font: None,
            font_px: 16.0,
        }
    }

    pub fn with_font(mut self, font: Font<'static>, font_px: f32) -> Self {
        self.font = Some(font);
        self.font_px = font_px.max(1.0);
        self
    }

    pub fn load_font(path: &Path) -> Result<Font<'static>> {
        let bytes = std::fs::read(path)?;
        Font::try_from_vec(bytes).ok_or_else(|| OverlayError::Font {
            path: path.to_path_buf(),
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let encoder = PngEncoder::new(&mut bytes);
        encoder.write_image(
            self.image.as_raw(),
            self.image.width(),
            self.image.height(),
            ExtendedColorType::Rgba8,
        )?;
        Ok(bytes)
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.encode_png()?)?;
        Ok(())
    }
}

/// Composites `color` at `coverage` over an existing overlay pixel.
fn blend(pixel: &mut Rgba<u8>, color: Color, coverage: f32) {
    let alpha = coverage.clamp(0.0, 1.0) * color.a as f32 / 255.0;
    let keep = 1.0 - alpha;
    for (channel, source) in pixel.0.iter_mut().zip([color.r, color.g, color.b]) {
        *channel = (source as f32 * alpha + *channel as f32 * keep).round() as u8;
    }
    pixel.0[3] = pixel.0[3].max((alpha * 255.0).round() as u8);
}

impl OverlaySurface for RgbaSurface {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {
        let transparent = Color::TRANSPARENT.to_pixel();
        for pixel in self.image.pixels_mut() {
            *pixel = transparent;
        }
    }

    fn draw_box(&mut self, rect: PixelRect, style: &BoxStyle) {
        if let Some(interior) = rect.to_rect() {
            draw_filled_rect_mut(&mut self.image, interior, style.fill.to_pixel());
        }
        for step in 0..style.line_width.max(1) {
            match rect.inset(step).and_then(PixelRect::to_rect) {
                Some(outline) => draw_hollow_rect_mut(&mut self.image, outline, style.stroke.to_pixel()),
                None => break,
            }
        }
    }

    fn fill_label_background(&mut self, rect: PixelRect, color: Color) {
        if let Some(rect) = rect.to_rect() {
            draw_filled_rect_mut(&mut self.image, rect, color.to_pixel());
        }
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Color) {
        let image = &mut self.image;
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let scale = Scale::uniform(self.font_px);
        let ascent = font.v_metrics(scale).ascent;
        let (width, height) = image.dimensions();

        for glyph in font.layout(text, scale, point(x as f32, y as f32 + ascent)) {
            let Some(bounds) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = bounds.min.x + gx as i32;
                let py = bounds.min.y + gy as i32;
                if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                    return;
                }
                blend(image.get_pixel_mut(px as u32, py as u32), color, coverage);
            });
        }
    }

    fn measure_text(&self, text: &str) -> (u32, u32) {
        let Some(font) = self.font.as_ref() else {
            // Rough monospace estimate so label backgrounds still make sense.
            let advance = (self.font_px / 2.0).ceil() as u32;
            return (text.chars().count() as u32 * advance, self.font_px.ceil() as u32 + 4);
        };
        let scale = Scale::uniform(self.font_px);
        let metrics = font.v_metrics(scale);
        let width = font
            .layout(text, scale, point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0);
        (width.ceil() as u32, (metrics.ascent - metrics.descent).ceil() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgba(255, 0, 0, 255);

    #[test]
    fn rgba_box_draws_outline_and_translucent_fill() {
        let mut surface = RgbaSurface::new(40, 40);
        let style = BoxStyle::outlined(RED, 64, 2);
        surface.draw_box(PixelRect::new(5, 5, 11, 11), &style);

        let image = surface.image();
        assert_eq!(image.get_pixel(5, 5), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(15, 15), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(6, 10), &Rgba([255, 0, 0, 255]), "second outline ring");
        assert_eq!(image.get_pixel(10, 10), &Rgba([255, 0, 0, 64]));
        assert_eq!(image.get_pixel(30, 30), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn rgba_clear_leaves_a_transparent_layer() {
        let mut surface = RgbaSurface::new(20, 20);
        surface.fill_label_background(PixelRect::new(0, 0, 20, 20), Color::WHITE);
        surface.clear();
        assert!(surface.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn boxes_partly_off_surface_are_clipped() {
        let mut surface = RgbaSurface::new(10, 10);
        let style = BoxStyle::outlined(RED, 0, 1);
        surface.draw_box(PixelRect::new(-5, -5, 8, 8), &style);
        surface.draw_box(PixelRect::new(50, 50, 8, 8), &style);
        surface.draw_box(PixelRect::new(2, 2, 0, 4), &style);
        assert_eq!(surface.image().get_pixel(2, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn extreme_rects_stay_in_range() {
        let mut surface = RgbaSurface::new(10, 10);
        let style = BoxStyle::outlined(RED, 255, 3);
        surface.draw_box(PixelRect::new(i32::MAX - 1, 0, u32::MAX, 4), &style);
        surface.fill_label_background(PixelRect::new(-4, -4, u32::MAX, u32::MAX), Color::WHITE);
        assert_eq!(surface.image().get_pixel(9, 9), &Color::WHITE.to_pixel());
        let sliver = PixelRect::new(0, 0, u32::MAX, u32::MAX).inset(i32::MAX as u32);
        assert_eq!(sliver, Some(PixelRect::new(i32::MAX, i32::MAX, 1, 1)));
    }

    #[test]
    fn text_without_font_is_skipped_but_measured() {
        let mut surface = RgbaSurface::new(20, 20);
        surface.draw_text(0, 0, "Pothole", Color::WHITE);
        assert!(surface.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert_eq!(surface.measure_text("abcd"), (32, 20));
    }

    #[test]
    fn png_encoding_round_trips_pixels() {
        let mut surface = RgbaSurface::new(8, 6);
        surface.fill_label_background(PixelRect::new(1, 1, 2, 2), RED);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.png");
        surface.save_png(&path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(5, 5), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn missing_font_file_is_an_io_error() {
        let err = RgbaSurface::load_font(Path::new("/definitely/not/here.ttf")).unwrap_err();
        assert!(matches!(err, OverlayError::Io(_)));
    }

    #[test]
    fn invalid_font_bytes_are_a_font_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let err = RgbaSurface::load_font(&path).unwrap_err();
        assert!(matches!(err, OverlayError::Font { .. }));
    }

    #[test]
    fn recording_surface_resets_on_clear() {
        let mut surface = RecordingSurface::new(100, 100);
        surface.draw_text(0, 0, "stale", Color::WHITE);
        surface.clear();
        assert!(surface.is_blank());
        assert_eq!(surface.ops(), &[DrawOp::Clear]);
        assert_eq!(surface.clear_count(), 1);
        assert_eq!(surface.measure_text("abc"), (21, 14));
    }

    #[test]
    fn inset_stops_when_nothing_is_left() {
        let rect = PixelRect::new(0, 0, 4, 4);
        assert_eq!(rect.inset(1), Some(PixelRect::new(1, 1, 2, 2)));
        assert_eq!(rect.inset(2), None);
    }
}
