use std::path::Path;
use std::time::Instant;

use image::RgbImage;
use rayon::prelude::*;

/// One captured image of the target window's client area, top-to-bottom RGB.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
    strategy: &'static str,
}

impl Frame {
    pub fn new(image: RgbImage, strategy: &'static str) -> Self {
        Self::at(image, strategy, Instant::now())
    }

    pub fn at(image: RgbImage, strategy: &'static str, captured_at: Instant) -> Self {
        Self { image, captured_at, strategy }
    }

    /// Convert a BGRA buffer, the layout both GDI DIBs and CoreGraphics hand back.
    /// `bottom_up` flips rows for bottom-up DIBs.
    pub fn from_bgra(
        data: &[u8],
        width: u32,
        height: u32,
        bytes_per_row: usize,
        bottom_up: bool,
        strategy: &'static str,
    ) -> Option<Self> {
        let w = width as usize;
        let h = height as usize;
        if w == 0 || h == 0 || bytes_per_row < w * 4 || data.len() < bytes_per_row * h {
            return None;
        }

        let mut rgb = vec![0u8; w * h * 3];
        rgb.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
            let src_y = if bottom_up { h - 1 - y } else { y };
            let start = src_y * bytes_per_row;
            let src = &data[start..start + w * 4];
            for (dst, px) in row.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                dst[0] = px[2];
                dst[1] = px[1];
                dst[2] = px[0];
            }
        });

        RgbImage::from_raw(width, height, rgb).map(|image| Self::new(image, strategy))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    /// Mean Rec.601 luma on a 0-255 scale.
    pub fn mean_luminance(&self) -> f64 {
        let raw = self.image.as_raw();
        let pixels = raw.len() / 3;
        if pixels == 0 {
            return 0.0;
        }
        let sum: u64 = raw
            .par_chunks_exact(3)
            .map(|p| 299 * p[0] as u64 + 587 * p[1] as u64 + 114 * p[2] as u64)
            .sum();
        sum as f64 / 1000.0 / pixels as f64
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}
