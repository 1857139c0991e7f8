use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::logger;
use crate::types::{PositionSample, Rect};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSettings {
    /// Frame-relative area used for view-shift estimation; whole frame when absent.
    pub region: Option<Rect>,
    /// Thumbnail width in pixels.
    pub thumb_width: u32,
    /// Largest shift searched per frame, in thumbnail pixels.
    pub max_shift: i32,
    /// Mean absolute gray difference of the best match above which the view
    /// is treated as a different scene.
    pub scene_cut_threshold: f32,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self { region: None, thumb_width: 64, max_shift: 6, scene_cut_threshold: 40.0 }
    }
}

struct Thumb {
    w: usize,
    h: usize,
    px: Vec<f32>,
    /// Source pixels per thumbnail pixel.
    scale: f32,
}

impl Thumb {
    fn build(img: &RgbImage, area: Rect, thumb_width: u32) -> Option<Self> {
        let area = area.clamp_to(img.width(), img.height())?;
        let w = thumb_width.clamp(1, area.w) as usize;
        let scale = area.w as f32 / w as f32;
        let h = ((area.h as f32 / scale).round() as usize).max(1);

        let mut px = vec![0f32; w * h];
        px.par_chunks_mut(w).enumerate().for_each(|(ty, row)| {
            let y0 = area.y as u32 + (ty as f32 * scale) as u32;
            let y1 = (area.y as u32 + ((ty + 1) as f32 * scale) as u32).min(area.bottom() as u32).max(y0 + 1);
            for (tx, out) in row.iter_mut().enumerate() {
                let x0 = area.x as u32 + (tx as f32 * scale) as u32;
                let x1 = (area.x as u32 + ((tx + 1) as f32 * scale) as u32).min(area.right() as u32).max(x0 + 1);
                let mut sum = 0f32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let [r, g, b] = img.get_pixel(x, y).0;
                        sum += 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                    }
                }
                *out = sum / ((y1 - y0) * (x1 - x0)) as f32;
            }
        });
        Some(Self { w, h, px, scale })
    }

    /// Mean |self(x, y) - prev(x + dx, y + dy)| over the overlap.
    fn error(&self, prev: &Thumb, dx: i32, dy: i32) -> Option<f32> {
        let (w, h) = (self.w as i32, self.h as i32);
        let xs = (-dx).max(0)..(w - dx).min(w);
        let ys = (-dy).max(0)..(h - dy).min(h);
        if xs.is_empty() || ys.is_empty() {
            return None;
        }
        let mut sum = 0f32;
        let mut n = 0u32;
        for y in ys {
            for x in xs.clone() {
                let a = self.px[(y * w + x) as usize];
                let b = prev.px[((y + dy) * w + x + dx) as usize];
                sum += (a - b).abs();
                n += 1;
            }
        }
        Some(sum / n as f32)
    }
}

/// Dead-reckons a relative position from how far the view content shifts
/// between consecutive frames. Only differences between samples mean anything.
pub struct MotionEstimator {
    settings: PositionSettings,
    reference: Option<Thumb>,
    position: (f32, f32),
}

impl MotionEstimator {
    pub fn new(settings: &PositionSettings) -> Self {
        Self { settings: settings.clone(), reference: None, position: (0.0, 0.0) }
    }

    pub fn observe(&mut self, frame: &Frame, degraded: bool) -> Option<PositionSample> {
        if degraded {
            return None;
        }
        let full = Rect::new(0, 0, frame.width(), frame.height());
        let thumb = Thumb::build(frame.image(), self.settings.region.unwrap_or(full), self.settings.thumb_width)?;

        if let Some(prev) = self.reference.as_ref().filter(|p| p.w == thumb.w && p.h == thumb.h) {
            match best_shift(&thumb, prev, self.settings.max_shift) {
                Some((dx, dy, err)) if err <= self.settings.scene_cut_threshold => {
                    self.position.0 += dx as f32 * thumb.scale;
                    self.position.1 += dy as f32 * thumb.scale;
                }
                Some((_, _, err)) => {
                    logger::info_p("vision", &format!("scene cut (match error {:.1}), position reference reset", err));
                }
                None => {}
            }
        }
        self.reference = Some(thumb);

        Some(PositionSample {
            x: self.position.0.round() as i32,
            y: self.position.1.round() as i32,
            at: frame.captured_at(),
        })
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }
}

/// Lowest-error shift; among equal errors the smallest |dx| + |dy| wins.
fn best_shift(cur: &Thumb, prev: &Thumb, max_shift: i32) -> Option<(i32, i32, f32)> {
    let mut shifts: Vec<(i32, i32)> = (-max_shift..=max_shift)
        .flat_map(|dy| (-max_shift..=max_shift).map(move |dx| (dx, dy)))
        .collect();
    shifts.sort_by_key(|(dx, dy)| dx.abs() + dy.abs());

    let mut best: Option<(i32, i32, f32)> = None;
    for (dx, dy) in shifts {
        let Some(err) = cur.error(prev, dx, dy) else { continue };
        if best.map_or(true, |(_, _, e)| err < e) {
            best = Some((dx, dy, err));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn world() -> RgbImage {
        RgbImage::from_fn(1000, 500, |x, y| {
            let cell = (x / 10).wrapping_mul(73_856_093) ^ (y / 10).wrapping_mul(19_349_663);
            let v = (cell.wrapping_mul(2_654_435_761) >> 24) as u8;
            Rgb([v, v / 2, 255 - v])
        })
    }

    fn view(world: &RgbImage, x: u32, y: u32) -> Frame {
        Frame::new(image::imageops::crop_imm(world, x, y, 640, 360).to_image(), "test")
    }

    #[test]
    fn first_frame_anchors_at_origin() {
        let mut est = MotionEstimator::new(&PositionSettings::default());
        let sample = est.observe(&view(&world(), 100, 50), false).unwrap();
        assert_eq!((sample.x, sample.y), (0, 0));
    }

    #[test]
    fn view_shift_is_tracked() {
        let w = world();
        let mut est = MotionEstimator::new(&PositionSettings::default());
        est.observe(&view(&w, 100, 50), false);
        let east = est.observe(&view(&w, 140, 50), false).unwrap();
        assert_eq!((east.x, east.y), (40, 0));
        let south_west = est.observe(&view(&w, 120, 80), false).unwrap();
        assert_eq!((south_west.x, south_west.y), (20, 30));
        let still = est.observe(&view(&w, 120, 80), false).unwrap();
        assert_eq!((still.x, still.y), (20, 30));
    }

    #[test]
    fn scene_cut_resets_reference_and_keeps_position() {
        let w = world();
        let mut est = MotionEstimator::new(&PositionSettings::default());
        est.observe(&view(&w, 100, 50), false);
        est.observe(&view(&w, 130, 50), false);

        let loading = Frame::new(RgbImage::from_pixel(640, 360, Rgb([255, 255, 255])), "test");
        let cut = est.observe(&loading, false).unwrap();
        assert_eq!((cut.x, cut.y), (30, 0));
    }

    #[test]
    fn degraded_frames_produce_no_sample() {
        let mut est = MotionEstimator::new(&PositionSettings::default());
        assert!(est.observe(&view(&world(), 0, 0), true).is_none());
    }
}
