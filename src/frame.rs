//! Backend-neutral display list produced by the visual modes.

use glam::Vec2;
use std::sync::Arc;

use crate::modes::ModeKind;

/// Straight RGBA color, components 0..1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::rgba8(r, g, b, 255)
    }

    pub fn rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    /// Hue in degrees, saturation/brightness/alpha 0..1
    pub fn hsba(hue: f32, saturation: f32, brightness: f32, alpha: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = saturation.clamp(0.0, 1.0);
        let v = brightness.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = v - c;
        Self::rgba(r + m, g + m, b + m, alpha.clamp(0.0, 1.0))
    }

    /// Hue in degrees, saturation/lightness/alpha 0..1
    pub fn hsla(hue: f32, saturation: f32, lightness: f32, alpha: f32) -> Self {
        let l = lightness.clamp(0.0, 1.0);
        let brightness = l + saturation.clamp(0.0, 1.0) * l.min(1.0 - l);
        let saturation = if brightness > 0.0 {
            2.0 * (1.0 - l / brightness)
        } else {
            0.0
        };
        Self::hsba(hue, saturation, brightness, alpha)
    }

    /// Same color with a different alpha (0..1)
    pub fn with_alpha(self, alpha: f32) -> Self {
        Self {
            a: alpha.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Same color with alpha given on the 0..255 scale
    pub fn with_alpha8(self, alpha: f32) -> Self {
        self.with_alpha(alpha / 255.0)
    }
}

/// How a shape is painted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Style {
    Fill(Color),
    Stroke { color: Color, width: f32 },
}

/// Compositing of a draw op onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blend {
    #[default]
    Normal,
    Additive,
}

/// Drawable primitives
#[derive(Debug, Clone)]
pub enum Shape {
    Circle {
        center: Vec2,
        radius: f32,
    },
    Ellipse {
        center: Vec2,
        radii: Vec2,
        /// Rotation in radians
        rotation: f32,
    },
    Line {
        from: Vec2,
        to: Vec2,
    },
    Polyline {
        points: Vec<Vec2>,
        closed: bool,
    },
    Rect {
        origin: Vec2,
        size: Vec2,
        corner_radius: f32,
    },
    Image {
        pixmap: Arc<tiny_skia::Pixmap>,
        origin: Vec2,
        size: Vec2,
        opacity: f32,
    },
}

/// One draw call
#[derive(Debug, Clone)]
pub struct DrawOp {
    pub shape: Shape,
    pub style: Style,
    pub blend: Blend,
}

/// What happens to the previous frame before drawing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clear {
    /// Replace everything with the color
    Full(Color),
    /// Paint the color translucently over the previous frame (trails)
    Fade(Color),
}

/// Draw list for one rendered frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub clear: Clear,
    pub ops: Vec<DrawOp>,
    /// Mode that produced the ops
    pub owner: Option<ModeKind>,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            clear: Clear::Full(Color::BLACK),
            ops: Vec::new(),
            owner: None,
            width,
            height,
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    /// Drop all ops, keep the buffer
    pub fn reset(&mut self, owner: Option<ModeKind>) {
        self.ops.clear();
        self.owner = owner;
        self.clear = Clear::Full(Color::BLACK);
    }

    pub fn push(&mut self, shape: Shape, style: Style, blend: Blend) {
        self.ops.push(DrawOp {
            shape,
            style,
            blend,
        });
    }

    pub fn circle(&mut self, center: Vec2, radius: f32, style: Style) {
        if radius > 0.0 {
            self.push(Shape::Circle { center, radius }, style, Blend::Normal);
        }
    }

    pub fn line(&mut self, from: Vec2, to: Vec2, color: Color, width: f32) {
        self.push(
            Shape::Line { from, to },
            Style::Stroke { color, width },
            Blend::Normal,
        );
    }

    pub fn polyline(&mut self, points: Vec<Vec2>, closed: bool, style: Style, blend: Blend) {
        if points.len() >= 2 {
            self.push(Shape::Polyline { points, closed }, style, blend);
        }
    }

    pub fn rect(&mut self, origin: Vec2, size: Vec2, corner_radius: f32, style: Style) {
        self.push(
            Shape::Rect {
                origin,
                size,
                corner_radius,
            },
            style,
            Blend::Normal,
        );
    }

    pub fn fill_screen(&mut self, color: Color, blend: Blend) {
        self.push(
            Shape::Rect {
                origin: Vec2::ZERO,
                size: self.size(),
                corner_radius: 0.0,
            },
            Style::Fill(color),
            blend,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hsb_primaries() {
        let red = Color::hsba(0.0, 1.0, 1.0, 1.0);
        assert_relative_eq!(red.r, 1.0);
        assert_relative_eq!(red.g, 0.0);

        let blue = Color::hsba(240.0, 1.0, 1.0, 0.5);
        assert_relative_eq!(blue.b, 1.0);
        assert_relative_eq!(blue.a, 0.5);

        let wrapped = Color::hsba(480.0, 1.0, 1.0, 1.0);
        assert_relative_eq!(wrapped.g, 1.0);
    }

    #[test]
    fn test_hsl_matches_css() {
        // hsl(200, 80%, 55%)
        let c = Color::hsla(200.0, 0.8, 0.55, 1.0);
        assert_relative_eq!(c.r, 0.19, epsilon = 1e-3);
        assert_relative_eq!(c.g, 0.67, epsilon = 1e-3);
        assert_relative_eq!(c.b, 0.91, epsilon = 1e-3);

        let grey = Color::hsla(10.0, 0.0, 0.5, 1.0);
        assert_relative_eq!(grey.r, 0.5);
        assert_relative_eq!(grey.b, 0.5);
    }

    #[test]
    fn test_degenerate_shapes_skipped() {
        let mut frame = Frame::new(100.0, 100.0);
        frame.circle(Vec2::ZERO, 0.0, Style::Fill(Color::WHITE));
        frame.polyline(vec![Vec2::ZERO], false, Style::Fill(Color::WHITE), Blend::Normal);
        assert!(frame.ops.is_empty());
    }
}
