use rayon::prelude::*;

use super::hsv::{HsvImage, HsvRange};

/// Binary image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, bits: vec![false; width * height] }
    }

    /// Pixels accepted by any of `ranges` (the OR of the per-range masks).
    pub fn threshold(img: &HsvImage, ranges: &[HsvRange]) -> Self {
        let bits = img
            .pixels()
            .par_iter()
            .map(|px| ranges.iter().any(|r| r.contains(*px)))
            .collect();
        Self { width: img.width() as usize, height: img.height() as usize, bits }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        self.bits[y * self.width + x] = on;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Square-kernel erosion. Pixels outside the image do not take part.
    pub fn erode(&self, k: usize) -> Self {
        self.morph(k, true)
    }

    /// Square-kernel dilation. Pixels outside the image do not take part.
    pub fn dilate(&self, k: usize) -> Self {
        self.morph(k, false)
    }

    /// Erode then dilate: drops specks smaller than the kernel.
    pub fn open(&self, k: usize) -> Self {
        self.erode(k).dilate(k)
    }

    /// Dilate then erode: fills gaps smaller than the kernel.
    pub fn close(&self, k: usize) -> Self {
        self.dilate(k).erode(k)
    }

    // A square window is separable: run it along rows, then along columns.
    fn morph(&self, k: usize, all: bool) -> Self {
        if k <= 1 || self.bits.is_empty() {
            return self.clone();
        }
        let r = k / 2;
        let (w, h) = (self.width, self.height);
        let mut horizontal = vec![false; w * h];
        horizontal.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let src = &self.bits[y * w..(y + 1) * w];
            for (x, out) in row.iter_mut().enumerate() {
                let lo = x.saturating_sub(r);
                let hi = (x + r).min(w - 1);
                *out = reduce(all, src[lo..=hi].iter().copied());
            }
        });

        let mut bits = vec![false; w * h];
        bits.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let lo = y.saturating_sub(r);
            let hi = (y + r).min(h - 1);
            for (x, out) in row.iter_mut().enumerate() {
                *out = reduce(all, (lo..=hi).map(|yy| horizontal[yy * w + x]));
            }
        });

        Self { width: w, height: h, bits }
    }
}

fn reduce(all: bool, mut window: impl Iterator<Item = bool>) -> bool {
    if all {
        window.all(|b| b)
    } else {
        window.any(|b| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(w: usize, h: usize, x0: usize, y0: usize, bw: usize, bh: usize) -> Mask {
        let mut m = Mask::new(w, h);
        for y in y0..y0 + bh {
            for x in x0..x0 + bw {
                m.set(x, y, true);
            }
        }
        m
    }

    #[test]
    fn open_removes_specks_and_keeps_blocks() {
        let mut m = block(20, 20, 5, 5, 6, 6);
        m.set(1, 1, true);
        m.set(17, 2, true);
        let opened = m.open(3);
        assert!(!opened.get(1, 1));
        assert!(!opened.get(17, 2));
        assert_eq!(opened, block(20, 20, 5, 5, 6, 6));
    }

    #[test]
    fn close_fills_small_holes() {
        let mut m = block(20, 20, 4, 4, 8, 8);
        m.set(7, 7, false);
        let closed = m.close(3);
        assert!(closed.get(7, 7));
        assert_eq!(closed.count(), 64);
    }

    #[test]
    fn block_touching_the_border_survives_open() {
        let m = block(10, 10, 0, 0, 4, 4);
        assert_eq!(m.open(3), m);
        assert_eq!(m.open(5).count(), 16);
    }
}
