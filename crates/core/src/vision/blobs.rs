use crate::types::{Rect, Region};

use super::mask::Mask;

/// 8-connected components of `mask`, each as a bounding box plus pixel count.
/// Boxes are in mask coordinates shifted by `origin`.
pub fn components(mask: &Mask, origin: (i32, i32)) -> Vec<Region> {
    let (w, h) = (mask.width(), mask.height());
    let mut seen = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if seen[start] || !mask.get(start % w, start / w) {
            continue;
        }
        seen[start] = true;
        stack.push(start);

        let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
        let mut area = 0u32;
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !seen[n] && mask.get(nx, ny) {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(Region {
            bbox: Rect::new(
                origin.0 + x0 as i32,
                origin.1 + y0 as i32,
                (x1 - x0 + 1) as u32,
                (y1 - y0 + 1) as u32,
            ),
            area,
        });
    }
    regions
}

/// Largest area first; ties by position so the order never depends on scan details.
pub fn sort_by_salience(regions: &mut [Region]) {
    regions.sort_by(|a, b| {
        b.area
            .cmp(&a.area)
            .then(a.bbox.y.cmp(&b.bbox.y))
            .then(a.bbox.x.cmp(&b.bbox.x))
    });
}
