//! HSV conversion in the 8-bit convention used by most vision tooling:
//! hue 0..=180 (degrees / 2), saturation and value 0..=255.

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let v = max;
    if max == 0 {
        return Hsv { h: 0, s: 0, v: 0 };
    }
    let delta = (max - min) as f32;
    let s = (delta * 255.0 / max as f32).round() as u8;
    if delta == 0.0 {
        return Hsv { h: 0, s, v };
    }

    let (r, g, b) = (r as f32, g as f32, b as f32);
    let mut deg = if max as f32 == r {
        60.0 * (g - b) / delta
    } else if max as f32 == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if deg < 0.0 {
        deg += 360.0;
    }
    let h = ((deg / 2.0).round() as u16 % 180) as u8;
    Hsv { h, s, v }
}

/// Inclusive box in HSV space. Serialized as `[[h, s, v], [h, s, v]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[[u8; 3]; 2]", into = "[[u8; 3]; 2]")]
pub struct HsvRange {
    pub lo: Hsv,
    pub hi: Hsv,
}

impl HsvRange {
    pub const fn new(lo: [u8; 3], hi: [u8; 3]) -> Self {
        Self {
            lo: Hsv { h: lo[0], s: lo[1], v: lo[2] },
            hi: Hsv { h: hi[0], s: hi[1], v: hi[2] },
        }
    }

    pub fn contains(&self, px: Hsv) -> bool {
        (self.lo.h..=self.hi.h).contains(&px.h)
            && (self.lo.s..=self.hi.s).contains(&px.s)
            && (self.lo.v..=self.hi.v).contains(&px.v)
    }

    pub fn is_well_formed(&self) -> bool {
        self.lo.h <= self.hi.h && self.hi.h <= 180 && self.lo.s <= self.hi.s && self.lo.v <= self.hi.v
    }
}

impl From<[[u8; 3]; 2]> for HsvRange {
    fn from(v: [[u8; 3]; 2]) -> Self {
        HsvRange::new(v[0], v[1])
    }
}

impl From<HsvRange> for [[u8; 3]; 2] {
    fn from(r: HsvRange) -> Self {
        [[r.lo.h, r.lo.s, r.lo.v], [r.hi.h, r.hi.s, r.hi.v]]
    }
}

/// HSV copy of a rectangular part of an RGB image.
pub struct HsvImage {
    width: u32,
    height: u32,
    /// Position of pixel (0, 0) in the source image.
    origin: (i32, i32),
    data: Vec<Hsv>,
}

impl HsvImage {
    /// Convert `area` of `img` (clipped to the image); `None` when nothing is left.
    pub fn from_rgb(img: &RgbImage, area: Rect) -> Option<Self> {
        let area = area.clamp_to(img.width(), img.height())?;
        let (w, h) = (area.w as usize, area.h as usize);
        let mut data = vec![Hsv::default(); w * h];
        data.par_chunks_mut(w).enumerate().for_each(|(row, out)| {
            let y = area.y as u32 + row as u32;
            for (col, px) in out.iter_mut().enumerate() {
                let [r, g, b] = img.get_pixel(area.x as u32 + col as u32, y).0;
                *px = rgb_to_hsv(r, g, b);
            }
        });
        Some(Self { width: area.w, height: area.h, origin: (area.x, area.y), data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    pub fn pixels(&self) -> &[Hsv] {
        &self.data
    }

    /// Share of pixels accepted by any of `ranges`.
    pub fn density(&self, ranges: &[HsvRange]) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let hits = self
            .data
            .par_iter()
            .filter(|px| ranges.iter().any(|r| r.contains(**px)))
            .count();
        hits as f32 / self.data.len() as f32
    }
}
