use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::types::{EntityLists, Rect, Region};

use super::blobs::{components, sort_by_salience};
use super::hsv::{HsvImage, HsvRange};
use super::mask::Mask;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRange {
    pub min: f32,
    pub max: f32,
}

/// Color and shape filter for one entity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRule {
    pub ranges: Vec<HsvRange>,
    /// Minimum component pixel count.
    pub min_area: u32,
    /// Bounding-box width / height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<AspectRange>,
    /// Maximum distance of the box center from the view center, normalized so
    /// the view edge is 1.0 (Chebyshev).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_center_distance: Option<f32>,
}

impl ClassRule {
    fn accepts(&self, region: &Region, view: Rect) -> bool {
        if region.area < self.min_area {
            return false;
        }
        if let Some(aspect) = self.aspect {
            let ratio = region.bbox.w as f32 / region.bbox.h.max(1) as f32;
            if ratio < aspect.min || ratio > aspect.max {
                return false;
            }
        }
        if let Some(limit) = self.max_center_distance {
            if center_distance(region.bbox, view) > limit {
                return false;
            }
        }
        true
    }
}

fn center_distance(bbox: Rect, view: Rect) -> f32 {
    let (cx, cy) = bbox.center();
    let (vx, vy) = view.center();
    let half_w = (view.w as f32 / 2.0).max(1.0);
    let half_h = (view.h as f32 / 2.0).max(1.0);
    ((cx - vx) as f32 / half_w).abs().max(((cy - vy) as f32 / half_h).abs())
}

/// Rules for every class. Defaults suit a saturated dungeon palette: red
/// mobs, amber stairs, violet portals, desaturated mid-gray walls, bright
/// green player names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassTable {
    pub enemy: ClassRule,
    pub stair: ClassRule,
    pub portal: ClassRule,
    pub obstacle: ClassRule,
    pub player: ClassRule,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            enemy: ClassRule {
                ranges: vec![
                    HsvRange::new([0, 120, 70], [10, 255, 255]),
                    HsvRange::new([170, 120, 70], [180, 255, 255]),
                ],
                min_area: 100,
                aspect: Some(AspectRange { min: 0.25, max: 4.0 }),
                max_center_distance: None,
            },
            stair: ClassRule {
                ranges: vec![HsvRange::new([15, 80, 80], [30, 255, 255])],
                min_area: 800,
                aspect: Some(AspectRange { min: 0.5, max: 3.0 }),
                max_center_distance: Some(0.6),
            },
            portal: ClassRule {
                ranges: vec![HsvRange::new([120, 100, 100], [150, 255, 255])],
                min_area: 500,
                aspect: Some(AspectRange { min: 0.6, max: 1.6 }),
                max_center_distance: None,
            },
            obstacle: ClassRule {
                ranges: vec![HsvRange::new([0, 0, 60], [180, 40, 160])],
                min_area: 1500,
                aspect: None,
                max_center_distance: None,
            },
            player: ClassRule {
                ranges: vec![HsvRange::new([50, 150, 150], [70, 255, 255])],
                min_area: 150,
                aspect: None,
                max_center_distance: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionSettings {
    /// Frame-relative area to classify; the whole frame when absent.
    pub roi: Option<Rect>,
    /// Morphology kernel side, 3 or 5.
    pub kernel: usize,
    pub classes: ClassTable,
}

impl Default for PerceptionSettings {
    fn default() -> Self {
        Self { roi: None, kernel: 3, classes: ClassTable::default() }
    }
}

/// Stateless color-segmentation classifier.
pub struct PerceptionClassifier {
    kernel: usize,
    classes: ClassTable,
}

impl PerceptionClassifier {
    pub fn new(settings: &PerceptionSettings) -> Self {
        Self { kernel: settings.kernel, classes: settings.classes.clone() }
    }

    /// Detect every class inside `roi` (whole frame when `None`). Boxes are in
    /// frame coordinates and each list is sorted most salient first.
    pub fn classify(&self, frame: &Frame, roi: Option<Rect>) -> EntityLists {
        let full = Rect::new(0, 0, frame.width(), frame.height());
        let Some(hsv) = HsvImage::from_rgb(frame.image(), roi.unwrap_or(full)) else {
            return EntityLists::default();
        };
        let (ox, oy) = hsv.origin();
        let view = Rect::new(ox, oy, hsv.width(), hsv.height());

        EntityLists {
            enemies: self.detect(&hsv, &self.classes.enemy, view),
            stairs: self.detect(&hsv, &self.classes.stair, view),
            portals: self.detect(&hsv, &self.classes.portal, view),
            obstacles: self.detect(&hsv, &self.classes.obstacle, view),
            players: self.detect(&hsv, &self.classes.player, view),
        }
    }

    fn detect(&self, hsv: &HsvImage, rule: &ClassRule, view: Rect) -> Vec<Region> {
        if rule.ranges.is_empty() {
            return Vec::new();
        }
        let mask = Mask::threshold(hsv, &rule.ranges).open(self.kernel).close(self.kernel);
        let mut regions: Vec<Region> = components(&mask, hsv.origin())
            .into_iter()
            .filter(|r| rule.accepts(r, view))
            .collect();
        sort_by_salience(&mut regions);
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scene() -> RgbImage {
        let mut img = RgbImage::from_pixel(320, 200, Rgb([30, 70, 35]));
        paint(&mut img, Rect::new(40, 30, 30, 24), Rgb([210, 25, 25]));
        paint(&mut img, Rect::new(200, 120, 14, 14), Rgb([190, 20, 40]));
        paint(&mut img, Rect::new(140, 80, 40, 30), Rgb([230, 170, 40]));
        img
    }

    fn paint(img: &mut RgbImage, r: Rect, color: Rgb<u8>) {
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }

    fn classifier() -> PerceptionClassifier {
        PerceptionClassifier::new(&PerceptionSettings::default())
    }

    #[test]
    fn red_rectangle_round_trips_to_one_enemy() {
        let mut img = RgbImage::from_pixel(160, 120, Rgb([30, 70, 35]));
        let target = Rect::new(50, 40, 22, 18);
        paint(&mut img, target, Rgb([200, 30, 30]));

        let lists = classifier().classify(&Frame::new(img, "test"), None);
        assert_eq!(lists.enemies.len(), 1);
        let found = lists.enemies[0].bbox;
        assert!((found.x - target.x).abs() <= 1 && (found.y - target.y).abs() <= 1, "{:?}", found);
        assert!((found.w as i32 - target.w as i32).abs() <= 2 && (found.h as i32 - target.h as i32).abs() <= 2);
        assert!(lists.stairs.is_empty() && lists.portals.is_empty() && lists.players.is_empty());
    }

    #[test]
    fn enemies_sorted_by_area_and_stair_found_near_center() {
        let lists = classifier().classify(&Frame::new(scene(), "test"), None);
        assert_eq!(lists.enemies.len(), 2);
        assert!(lists.enemies[0].area > lists.enemies[1].area);
        assert_eq!(lists.enemies[0].bbox, Rect::new(40, 30, 30, 24));
        assert_eq!(lists.stairs.len(), 1);
        assert_eq!(lists.stairs[0].bbox, Rect::new(140, 80, 40, 30));
    }

    #[test]
    fn classification_is_deterministic() {
        let frame = Frame::new(scene(), "test");
        let c = classifier();
        let first = c.classify(&frame, None);
        for _ in 0..3 {
            assert_eq!(c.classify(&frame, None), first);
        }
    }

    #[test]
    fn small_and_off_center_candidates_are_filtered() {
        let mut img = RgbImage::from_pixel(320, 200, Rgb([30, 70, 35]));
        // too small for an enemy
        paint(&mut img, Rect::new(10, 10, 8, 8), Rgb([210, 25, 25]));
        // stair-colored but at the edge of view
        paint(&mut img, Rect::new(280, 5, 36, 30), Rgb([230, 170, 40]));
        let lists = classifier().classify(&Frame::new(img, "test"), None);
        assert!(lists.enemies.is_empty());
        assert!(lists.stairs.is_empty());
    }

    #[test]
    fn roi_limits_search_and_keeps_frame_coordinates() {
        let frame = Frame::new(scene(), "test");
        let lists = classifier().classify(&frame, Some(Rect::new(150, 100, 170, 100)));
        assert_eq!(lists.enemies.len(), 1);
        assert_eq!(lists.enemies[0].bbox, Rect::new(200, 120, 14, 14));
    }
}
