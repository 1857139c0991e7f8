//! HUD health/mana estimation from color density inside calibrated rectangles.
//!
//! The reading is the share of bar-colored pixels mapped through a banded
//! table, not a bar length. It tolerates partial occlusion and is coarse
//! (about 15 points either way).

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::logger;
use crate::types::{Rect, Vitals};

use super::blobs::{components, sort_by_salience};
use super::hsv::{HsvImage, HsvRange};
use super::mask::Mask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarColor {
    Red,
    Green,
    Blue,
}

impl BarColor {
    pub fn ranges(self) -> &'static [HsvRange] {
        const RED: [HsvRange; 2] = [
            HsvRange::new([0, 100, 80], [10, 255, 255]),
            HsvRange::new([170, 100, 80], [180, 255, 255]),
        ];
        const GREEN: [HsvRange; 1] = [HsvRange::new([40, 100, 60], [85, 255, 255])];
        const BLUE: [HsvRange; 1] = [HsvRange::new([100, 100, 60], [130, 255, 255])];
        match self {
            BarColor::Red => &RED,
            BarColor::Green => &GREEN,
            BarColor::Blue => &BLUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bar {
    Health,
    Mana,
}

/// Frame-relative rectangle holding one HUD bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRegion {
    pub rect: Rect,
    pub color: BarColor,
}

/// Densities above `min_density` read as `pct`. Checked top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityBand {
    pub min_density: f32,
    pub pct: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsSettings {
    pub health: Option<CalibrationRegion>,
    pub mana: Option<CalibrationRegion>,
    pub bands: Vec<DensityBand>,
    /// Smallest cluster calibration will accept as a bar.
    pub calibration_min_pixels: u32,
}

impl Default for VitalsSettings {
    fn default() -> Self {
        Self {
            health: None,
            mana: None,
            bands: vec![
                DensityBand { min_density: 0.10, pct: 100 },
                DensityBand { min_density: 0.07, pct: 75 },
                DensityBand { min_density: 0.04, pct: 50 },
                DensityBand { min_density: 0.02, pct: 25 },
            ],
            calibration_min_pixels: 30,
        }
    }
}

/// Result of one calibration scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationReport {
    pub health: Option<CalibrationRegion>,
    pub mana: Option<CalibrationRegion>,
    pub health_pixels: u32,
    pub mana_pixels: u32,
    /// Bumped each time a report is applied to the live estimator.
    pub generation: u32,
}

impl CalibrationReport {
    pub fn is_complete(&self) -> bool {
        self.health.is_some() && self.mana.is_some()
    }
}

impl std::fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |r: &Option<CalibrationRegion>, px: u32| match r {
            Some(c) => format!("{:?} {}x{} at ({}, {}) [{} px]", c.color, c.rect.w, c.rect.h, c.rect.x, c.rect.y, px),
            None => "not found".to_string(),
        };
        write!(f, "health: {}, mana: {}", show(&self.health, self.health_pixels), show(&self.mana, self.mana_pixels))
    }
}

/// Fractional candidate areas where MMO HUDs put their bars.
const HUD_CANDIDATES: [(f32, f32, f32, f32); 6] = [
    (0.0, 0.0, 0.35, 0.2),
    (0.3, 0.0, 0.4, 0.2),
    (0.0, 0.8, 0.35, 0.2),
    (0.3, 0.8, 0.4, 0.2),
    (0.65, 0.8, 0.35, 0.2),
    (0.65, 0.0, 0.35, 0.2),
];

pub struct VitalsEstimator {
    settings: VitalsSettings,
    generation: u32,
}

impl VitalsEstimator {
    pub fn new(settings: &VitalsSettings) -> Self {
        Self { settings: settings.clone(), generation: 0 }
    }

    pub fn settings(&self) -> &VitalsSettings {
        &self.settings
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Read both bars. Missing calibration or a degraded frame gives the
    /// unmeasured 100% default for the affected bar.
    pub fn estimate(&self, frame: &Frame, degraded: bool) -> Vitals {
        if degraded {
            return Vitals::UNKNOWN;
        }
        let health = self.settings.health.and_then(|r| self.read(frame, r));
        let mana = self.settings.mana.and_then(|r| self.read(frame, r));
        Vitals {
            health_pct: health.unwrap_or(100),
            mana_pct: mana.unwrap_or(100),
            health_measured: health.is_some(),
            mana_measured: mana.is_some(),
        }
    }

    fn read(&self, frame: &Frame, region: CalibrationRegion) -> Option<u8> {
        let hsv = HsvImage::from_rgb(frame.image(), region.rect)?;
        Some(density_to_pct(hsv.density(region.color.ranges()), &self.settings.bands))
    }

    /// Scan the HUD candidate areas for bar-colored clusters. Never runs
    /// implicitly; the caller decides whether to `apply` the result.
    pub fn calibrate(&self, frame: &Frame) -> CalibrationReport {
        let min = self.settings.calibration_min_pixels;
        let health = [BarColor::Red, BarColor::Green]
            .into_iter()
            .filter_map(|c| largest_cluster(frame, c, min))
            .max_by_key(|(_, px)| *px);
        let mana = largest_cluster(frame, BarColor::Blue, min);

        let report = CalibrationReport {
            health: health.map(|(r, _)| r),
            mana: mana.map(|(r, _)| r),
            health_pixels: health.map_or(0, |(_, px)| px),
            mana_pixels: mana.map_or(0, |(_, px)| px),
            generation: self.generation,
        };
        logger::info_p("vision", &format!("calibration scan: {}", report));
        report
    }

    /// Adopt the rectangles `report` found; bars it missed keep their old region.
    pub fn apply(&mut self, report: &CalibrationReport) -> CalibrationReport {
        if report.health.is_some() {
            self.settings.health = report.health;
        }
        if report.mana.is_some() {
            self.settings.mana = report.mana;
        }
        self.generation += 1;
        CalibrationReport {
            health: self.settings.health,
            mana: self.settings.mana,
            generation: self.generation,
            ..report.clone()
        }
    }
}

pub fn density_to_pct(density: f32, bands: &[DensityBand]) -> u8 {
    bands
        .iter()
        .find(|b| density > b.min_density)
        .map_or(0, |b| b.pct.min(100))
}

fn largest_cluster(frame: &Frame, color: BarColor, min_pixels: u32) -> Option<(CalibrationRegion, u32)> {
    let full = Rect::new(0, 0, frame.width(), frame.height());
    HUD_CANDIDATES
        .iter()
        .filter_map(|&(fx, fy, fw, fh)| HsvImage::from_rgb(frame.image(), full.fraction(fx, fy, fw, fh)))
        .flat_map(|hsv| {
            let mask = Mask::threshold(&hsv, color.ranges());
            let mut found = components(&mask, hsv.origin());
            sort_by_salience(&mut found);
            found.into_iter().next()
        })
        .filter(|r| r.area >= min_pixels)
        .max_by(|a, b| a.area.cmp(&b.area).then(b.bbox.y.cmp(&a.bbox.y)))
        .map(|r| (CalibrationRegion { rect: r.bbox, color }, r.area))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with(rect: Rect, fill: Rgb<u8>) -> Frame {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([30, 30, 30]));
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                img.put_pixel(x as u32, y as u32, fill);
            }
        }
        Frame::new(img, "test")
    }

    fn estimator_for(health: Rect, mana: Rect) -> VitalsEstimator {
        VitalsEstimator::new(&VitalsSettings {
            health: Some(CalibrationRegion { rect: health, color: BarColor::Red }),
            mana: Some(CalibrationRegion { rect: mana, color: BarColor::Blue }),
            ..Default::default()
        })
    }

    #[test]
    fn full_red_reads_top_band_and_empty_reads_zero() {
        let bar = Rect::new(10, 10, 100, 8);
        let est = estimator_for(bar, Rect::new(10, 30, 100, 8));
        let vitals = est.estimate(&frame_with(bar, Rgb([210, 20, 20])), false);
        assert!(vitals.health_pct >= 90);
        assert!(vitals.health_measured);
        assert_eq!(vitals.mana_pct, 0);
        assert!(vitals.mana_measured);
    }

    #[test]
    fn bands_taper() {
        let bands = VitalsSettings::default().bands;
        assert_eq!(density_to_pct(0.5, &bands), 100);
        assert_eq!(density_to_pct(0.08, &bands), 75);
        assert_eq!(density_to_pct(0.05, &bands), 50);
        assert_eq!(density_to_pct(0.03, &bands), 25);
        assert_eq!(density_to_pct(0.02, &bands), 0);
        assert_eq!(density_to_pct(0.0, &bands), 0);
    }

    #[test]
    fn degraded_or_uncalibrated_gives_unmeasured_default() {
        let frame = frame_with(Rect::new(0, 0, 1, 1), Rgb([0, 0, 0]));
        let est = estimator_for(Rect::new(10, 10, 50, 5), Rect::new(10, 20, 50, 5));
        assert_eq!(est.estimate(&frame, true), Vitals::UNKNOWN);
        let blank = VitalsEstimator::new(&VitalsSettings::default());
        assert_eq!(blank.estimate(&frame, false), Vitals::UNKNOWN);
    }

    #[test]
    fn calibration_finds_hud_bars() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([30, 30, 30]));
        for x in 12..112 {
            for y in 8..14 {
                img.put_pixel(x, y, Rgb([200, 20, 20]));
            }
            for y in 20..26 {
                img.put_pixel(x, y, Rgb([20, 40, 210]));
            }
        }
        let frame = Frame::new(img, "test");
        let mut est = VitalsEstimator::new(&VitalsSettings::default());

        let report = est.calibrate(&frame);
        assert!(report.is_complete());
        assert_eq!(report.health.unwrap().rect, Rect::new(12, 8, 100, 6));
        assert_eq!(report.health.unwrap().color, BarColor::Red);
        assert_eq!(report.mana.unwrap().rect, Rect::new(12, 20, 100, 6));
        assert_eq!(report.health_pixels, 600);

        // calibrate alone changes nothing
        assert!(!est.estimate(&frame, false).health_measured);
        let applied = est.apply(&report);
        assert_eq!(applied.generation, 1);
        let vitals = est.estimate(&frame, false);
        assert!(vitals.health_measured && vitals.health_pct >= 90);
        assert!(vitals.mana_measured && vitals.mana_pct >= 90);
    }

    #[test]
    fn calibration_ignores_clusters_below_pixel_floor() {
        let frame = frame_with(Rect::new(5, 5, 4, 4), Rgb([200, 20, 20]));
        let report = VitalsEstimator::new(&VitalsSettings::default()).calibrate(&frame);
        assert!(report.health.is_none());
        assert!(report.mana.is_none());
    }
}
