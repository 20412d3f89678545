//! CPU rasterizer for [`Frame`] display lists.
//!
//! The pixmap persists between frames so translucent clears leave trails.

use glam::Vec2;
use log::warn;
use std::path::Path;
use tiny_skia::{
    BlendMode, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Rect,
    Stroke, Transform,
};

use crate::frame::{Blend, Clear, Color, DrawOp, Frame, Shape, Style};

fn skia_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        color.a.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn blend_mode(blend: Blend) -> BlendMode {
    match blend {
        Blend::Normal => BlendMode::SourceOver,
        Blend::Additive => BlendMode::Plus,
    }
}

fn rounded_rect(origin: Vec2, size: Vec2, radius: f32) -> Option<tiny_skia::Path> {
    let r = radius.min(size.x * 0.5).min(size.y * 0.5).max(0.0);
    if r <= 0.0 {
        let rect = Rect::from_xywh(origin.x, origin.y, size.x, size.y)?;
        return Some(PathBuilder::from_rect(rect));
    }
    let (x0, y0) = (origin.x, origin.y);
    let (x1, y1) = (origin.x + size.x, origin.y + size.y);
    let mut pb = PathBuilder::new();
    pb.move_to(x0 + r, y0);
    pb.line_to(x1 - r, y0);
    pb.quad_to(x1, y0, x1, y0 + r);
    pb.line_to(x1, y1 - r);
    pb.quad_to(x1, y1, x1 - r, y1);
    pb.line_to(x0 + r, y1);
    pb.quad_to(x0, y1, x0, y1 - r);
    pb.line_to(x0, y0 + r);
    pb.quad_to(x0, y0, x0 + r, y0);
    pb.close();
    pb.finish()
}

/// Rasterizes frames into a persistent RGBA pixmap
pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    /// Zero-sized canvases are bumped to 1x1
    pub fn new(width: u32, height: u32) -> Self {
        let pixmap = Pixmap::new(width.max(1), height.max(1))
            .or_else(|| Pixmap::new(1, 1))
            .unwrap_or_else(|| unreachable!("1x1 pixmap always allocates"));
        Self { pixmap }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Reallocate for a new size (contents are lost)
    pub fn resize(&mut self, width: u32, height: u32) {
        if width.max(1) != self.width() || height.max(1) != self.height() {
            *self = Self::new(width, height);
        }
    }

    /// Premultiplied RGBA8 pixels, row-major
    pub fn pixels(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Color of one pixel (premultiplied RGBA8)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixmap.pixel(x, y).map(|p| [p.red(), p.green(), p.blue(), p.alpha()])
    }

    pub fn draw(&mut self, frame: &Frame) {
        match frame.clear {
            Clear::Full(color) => self.pixmap.fill(skia_color(color.with_alpha(1.0))),
            Clear::Fade(color) => {
                let mut paint = Paint::default();
                paint.set_color(skia_color(color));
                if let Some(rect) =
                    Rect::from_xywh(0.0, 0.0, self.width() as f32, self.height() as f32)
                {
                    self.pixmap
                        .fill_rect(rect, &paint, Transform::identity(), None);
                }
            }
        }

        for op in &frame.ops {
            self.draw_op(op);
        }
    }

    fn draw_op(&mut self, op: &DrawOp) {
        let (path, transform) = match &op.shape {
            Shape::Image {
                pixmap,
                origin,
                size,
                opacity,
            } => {
                let sx = size.x / pixmap.width() as f32;
                let sy = size.y / pixmap.height() as f32;
                let paint = PixmapPaint {
                    opacity: opacity.clamp(0.0, 1.0),
                    blend_mode: blend_mode(op.blend),
                    ..Default::default()
                };
                let src: &Pixmap = pixmap;
                self.pixmap.draw_pixmap(
                    0,
                    0,
                    src.as_ref(),
                    &paint,
                    Transform::from_scale(sx, sy).post_translate(origin.x, origin.y),
                    None,
                );
                return;
            }
            Shape::Circle { center, radius } => (
                PathBuilder::from_circle(center.x, center.y, *radius),
                Transform::identity(),
            ),
            Shape::Ellipse {
                center,
                radii,
                rotation,
            } => (
                Rect::from_xywh(-radii.x, -radii.y, radii.x * 2.0, radii.y * 2.0)
                    .and_then(PathBuilder::from_oval),
                Transform::from_rotate(rotation.to_degrees()).post_translate(center.x, center.y),
            ),
            Shape::Line { from, to } => {
                let mut pb = PathBuilder::new();
                pb.move_to(from.x, from.y);
                pb.line_to(to.x, to.y);
                (pb.finish(), Transform::identity())
            }
            Shape::Polyline { points, closed } => {
                let mut pb = PathBuilder::new();
                for (i, p) in points.iter().enumerate() {
                    if i == 0 {
                        pb.move_to(p.x, p.y);
                    } else {
                        pb.line_to(p.x, p.y);
                    }
                }
                if *closed {
                    pb.close();
                }
                (pb.finish(), Transform::identity())
            }
            Shape::Rect {
                origin,
                size,
                corner_radius,
            } => (
                rounded_rect(*origin, *size, *corner_radius),
                Transform::identity(),
            ),
        };

        // Degenerate geometry (zero radius, NaN coordinates) draws nothing
        let Some(path) = path else {
            return;
        };

        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.blend_mode = blend_mode(op.blend);
        match op.style {
            Style::Fill(color) => {
                paint.set_color(skia_color(color));
                self.pixmap
                    .fill_path(&path, &paint, FillRule::Winding, transform, None);
            }
            Style::Stroke { color, width } => {
                paint.set_color(skia_color(color));
                let stroke = Stroke {
                    width: width.max(0.1),
                    line_cap: LineCap::Round,
                    line_join: LineJoin::Round,
                    ..Default::default()
                };
                self.pixmap
                    .stroke_path(&path, &paint, &stroke, transform, None);
            }
        }
    }

    /// Write the current pixels as a PNG
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        // Demultiply partially transparent pixels
        let mut data = self.pixmap.data().to_vec();
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u32;
            if a > 0 && a < 255 {
                for c in &mut px[..3] {
                    *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
                }
            }
        }
        image::save_buffer(
            path,
            &data,
            self.width(),
            self.height(),
            image::ColorType::Rgba8,
        )
        .inspect_err(|e| warn!("Failed to save {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_full_clear_then_circle() {
        let mut canvas = Canvas::new(64, 64);
        let mut frame = Frame::new(64.0, 64.0);
        frame.clear = Clear::Full(Color::rgb8(0, 0, 255));
        frame.circle(Vec2::new(32.0, 32.0), 10.0, Style::Fill(Color::rgb8(255, 0, 0)));
        canvas.draw(&frame);

        assert_eq!(canvas.pixel(32, 32), Some([255, 0, 0, 255]));
        assert_eq!(canvas.pixel(2, 2), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_fade_leaves_trail() {
        let mut canvas = Canvas::new(16, 16);
        let mut frame = Frame::new(16.0, 16.0);
        frame.clear = Clear::Full(Color::BLACK);
        frame.fill_screen(Color::WHITE, Blend::Normal);
        canvas.draw(&frame);

        let mut fade = Frame::new(16.0, 16.0);
        fade.clear = Clear::Fade(Color::BLACK.with_alpha(0.5));
        canvas.draw(&fade);

        let [r, _, _, a] = canvas.pixel(8, 8).unwrap();
        assert_eq!(a, 255);
        assert!(r > 100 && r < 160, "r = {r}");
    }

    #[test]
    fn test_additive_blend_brightens() {
        let mut canvas = Canvas::new(8, 8);
        let mut frame = Frame::new(8.0, 8.0);
        frame.clear = Clear::Full(Color::rgb8(100, 0, 0));
        frame.fill_screen(Color::rgb8(100, 0, 0), Blend::Additive);
        canvas.draw(&frame);
        let [r, ..] = canvas.pixel(4, 4).unwrap();
        assert!(r >= 199);
    }

    #[test]
    fn test_image_is_scaled_into_rect() {
        let mut src = Pixmap::new(2, 2).unwrap();
        src.fill(tiny_skia::Color::WHITE);

        let mut canvas = Canvas::new(10, 10);
        let mut frame = Frame::new(10.0, 10.0);
        frame.push(
            Shape::Image {
                pixmap: Arc::new(src),
                origin: Vec2::ZERO,
                size: Vec2::new(10.0, 5.0),
                opacity: 1.0,
            },
            Style::Fill(Color::WHITE),
            Blend::Normal,
        );
        canvas.draw(&frame);
        assert_eq!(canvas.pixel(5, 2), Some([255, 255, 255, 255]));
        assert_eq!(canvas.pixel(5, 8), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_png_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let canvas = Canvas::new(4, 4);
        canvas.save_png(&path).unwrap();
        assert!(path.exists());
    }
}
