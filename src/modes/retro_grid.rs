//! Retro grid: a receding neon grid over a looping backdrop, with ray trails.

use glam::Vec2;
use image::AnimationDecoder;
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::{IntSize, Pixmap};

use super::{FrameContext, InputEvent, ModeKind, Viewport, VisualMode};
use crate::error::ModeFault;
use crate::frame::{Blend, Clear, Color, Frame, Shape, Style};

/// Horizon height as a fraction of the canvas
const HORIZON: f32 = 0.55;
/// Horizontal grid rows between horizon and bottom edge
const GRID_ROWS: usize = 18;

/// Premultiply an RGBA image into a pixmap
fn pixmap_from_rgba(image: image::RgbaImage) -> Option<Pixmap> {
    let size = IntSize::from_wh(image.width(), image.height())?;
    let mut data = image.into_raw();
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        for c in &mut px[..3] {
            *c = ((*c as u32 * a + 127) / 255) as u8;
        }
    }
    Pixmap::from_vec(data, size)
}

fn dimension_error() -> image::ImageError {
    image::ImageError::Limits(image::error::LimitError::from_kind(
        image::error::LimitErrorKind::DimensionError,
    ))
}

/// Decoded background loop: an animated GIF or a single still image
pub struct BackdropLoop {
    frames: Vec<(Arc<Pixmap>, f32)>,
    total_s: f32,
}

impl BackdropLoop {
    /// Decode every frame up front so rendering never touches the disk
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let is_gif = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"));

        let mut frames = Vec::new();
        if is_gif {
            let reader = BufReader::new(File::open(path)?);
            let decoder = image::codecs::gif::GifDecoder::new(reader)?;
            for frame in decoder.into_frames().collect_frames()? {
                let (num, den) = frame.delay().numer_denom_ms();
                let delay_s = if den == 0 { 0.1 } else { num as f32 / den as f32 / 1000.0 };
                let pixmap = pixmap_from_rgba(frame.into_buffer()).ok_or_else(dimension_error)?;
                frames.push((Arc::new(pixmap), delay_s.max(0.02)));
            }
        } else {
            let image = image::open(path)?.to_rgba8();
            let pixmap = pixmap_from_rgba(image).ok_or_else(dimension_error)?;
            frames.push((Arc::new(pixmap), 1.0));
        }

        let loop_ = Self::from_frames(frames).ok_or_else(dimension_error)?;
        info!(
            "Backdrop {}: {} frame(s), {:.2}s loop",
            path.display(),
            loop_.frames.len(),
            loop_.total_s
        );
        Ok(loop_)
    }

    pub fn from_frames(frames: Vec<(Arc<Pixmap>, f32)>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let total_s = frames.iter().map(|(_, d)| *d).sum();
        Some(Self { frames, total_s })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame shown at `t` seconds into the loop
    pub fn frame_at(&self, t: f64) -> &Arc<Pixmap> {
        if self.frames.len() == 1 || self.total_s <= 0.0 {
            return &self.frames[0].0;
        }
        let mut local = (t.rem_euclid(self.total_s as f64)) as f32;
        for (pixmap, delay) in &self.frames {
            if local < *delay {
                return pixmap;
            }
            local -= delay;
        }
        &self.frames[self.frames.len() - 1].0
    }
}

struct Ray {
    origin: Vec2,
    angle: f32,
    len: f32,
    hue: f32,
    width: f32,
    alpha: f32,
}

pub struct RetroGrid {
    viewport: Viewport,
    backdrop: Option<Arc<BackdropLoop>>,
    rays: Vec<Ray>,
    frame_count: f32,
    /// Beat flash, 1 on a beat and decaying
    pulse: f32,
}

impl RetroGrid {
    pub fn new(_seed: u64, backdrop: Option<Arc<BackdropLoop>>) -> Self {
        Self {
            viewport: Viewport::new(1.0, 1.0),
            backdrop,
            rays: Vec::new(),
            frame_count: 0.0,
            pulse: 0.0,
        }
    }

    fn draw_backdrop(&self, ctx: &FrameContext<'_>, frame: &mut Frame) {
        let size = self.viewport.size();
        if let Some(backdrop) = &self.backdrop {
            // Cover: scale to fill, keep aspect, center
            let pixmap = backdrop.frame_at(ctx.elapsed);
            let src = Vec2::new(pixmap.width() as f32, pixmap.height() as f32);
            let scale = (size.x / src.x).max(size.y / src.y);
            let drawn = src * scale;
            frame.push(
                Shape::Image {
                    pixmap: Arc::clone(pixmap),
                    origin: (size - drawn) * 0.5,
                    size: drawn,
                    opacity: 1.0,
                },
                Style::Fill(Color::WHITE),
                Blend::Normal,
            );
            return;
        }

        // Procedural sunset: sky, banded sun, horizon glow
        let horizon = size.y * HORIZON;
        frame.rect(
            Vec2::ZERO,
            Vec2::new(size.x, horizon),
            0.0,
            Style::Fill(Color::rgb8(28, 8, 60)),
        );
        let sun_center = Vec2::new(size.x * 0.5, horizon - self.viewport.min_side() * 0.04);
        let sun_radius = self.viewport.min_side() * (0.2 + 0.02 * ctx.bands.bass);
        for (i, tint) in [(255, 110, 80), (255, 150, 90), (255, 205, 110)]
            .into_iter()
            .enumerate()
        {
            let r = sun_radius * (1.0 - i as f32 * 0.12);
            frame.circle(sun_center, r, Style::Fill(Color::rgb8(tint.0, tint.1, tint.2)));
        }
        // Stripes cut through the lower half of the sun
        let sky = Color::rgb8(28, 8, 60);
        for band in 0..6 {
            let y = sun_center.y + sun_radius * (0.15 + band as f32 * 0.14);
            let h = 2.0 + band as f32 * 1.5;
            frame.rect(
                Vec2::new(sun_center.x - sun_radius, y),
                Vec2::new(sun_radius * 2.0, h),
                0.0,
                Style::Fill(sky),
            );
        }
        frame.rect(
            Vec2::new(0.0, horizon),
            Vec2::new(size.x, size.y - horizon),
            0.0,
            Style::Fill(Color::rgb8(8, 2, 20)),
        );
    }

    fn draw_grid(&self, ctx: &FrameContext<'_>, frame: &mut Frame) {
        let opts = &ctx.params.retro_grid;
        let size = self.viewport.size();
        let horizon = size.y * HORIZON;
        let depth = size.y - horizon;
        let vanish = Vec2::new(size.x * 0.5, horizon);

        let glow = (0.35 + 0.35 * ctx.bands.bass + 0.3 * self.pulse) * opts.intensity;
        let color = Color::rgb8(255, 60, 200).with_alpha(glow.min(1.0));
        let width = (1.0 + self.pulse) * opts.intensity;

        // Rows scroll towards the viewer; squaring the depth gives perspective
        let phase = (ctx.elapsed as f32 * opts.grid_speed).fract();
        for row in 0..GRID_ROWS {
            let t = (row as f32 + phase) / GRID_ROWS as f32;
            let y = horizon + depth * t * t;
            frame.line(
                Vec2::new(0.0, y),
                Vec2::new(size.x, y),
                color.with_alpha(color.a * t.max(0.15)),
                width * t.max(0.3),
            );
        }

        let cols = opts.grid_cols.max(2) as f32;
        for col in 0..=opts.grid_cols {
            let u = col as f32 / cols * 2.0 - 1.0;
            let bottom = Vec2::new(vanish.x + u * size.x * 1.5, size.y);
            frame.line(vanish, bottom, color, width * 0.8);
        }
    }
}

impl VisualMode for RetroGrid {
    fn kind(&self) -> ModeKind {
        ModeKind::RetroGrid
    }

    fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>, frame: &mut Frame) -> Result<(), ModeFault> {
        let frames = ctx.frames();
        self.frame_count += frames;
        frame.clear = Clear::Full(Color::BLACK);

        if ctx.beat() {
            self.pulse = 1.0;
        } else {
            self.pulse = (self.pulse - 0.05 * frames).max(0.0);
        }

        self.draw_backdrop(ctx, frame);
        self.draw_grid(ctx, frame);

        for ray in &mut self.rays {
            let tip = ray.origin + Vec2::from_angle(ray.angle) * ray.len;
            frame.push(
                Shape::Line {
                    from: ray.origin,
                    to: tip,
                },
                Style::Stroke {
                    color: Color::hsba(ray.hue, 0.9, 1.0, ray.alpha / 255.0),
                    width: ray.width,
                },
                Blend::Additive,
            );
            ray.len += 2.0 * frames;
            ray.alpha -= 3.0 * frames;
        }
        self.rays.retain(|ray| ray.alpha > 0.0);
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        if let InputEvent::PointerMove { pos, pressed: true } = *event {
            let from_center = pos - self.viewport.center();
            self.rays.push(Ray {
                origin: pos,
                angle: from_center.y.atan2(from_center.x),
                len: 20.0,
                hue: (self.frame_count.floor() * 2.0) % 360.0,
                width: 2.5,
                alpha: 200.0,
            });
        }
    }

    fn on_deactivate(&mut self) {
        self.rays.clear();
    }

    fn entity_count(&self) -> usize {
        self.rays.len()
    }

    fn status_line(&self) -> Option<String> {
        Some(match &self.backdrop {
            Some(b) => format!("backdrop {} frame(s), {} rays", b.len(), self.rays.len()),
            None => format!("sun, {} rays", self.rays.len()),
        })
    }
}
