use image::{imageops, GrayImage};
use serde::Serialize;

use crate::settings::MarkerSettings;

/// Largest accepted bright blob, in full-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerDetection {
    pub center: (u32, u32),
    pub bounds: Bounds,
    pub area: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Finds the IR reflector as a small bright blob inside a region of interest.
///
/// The region is blurred before thresholding so single hot pixels and sensor
/// speckle do not pass for the marker.
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    settings: MarkerSettings,
}

struct Roi {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

impl MarkerDetector {
    pub fn new(settings: MarkerSettings) -> Self {
        Self { settings }
    }

    pub fn detect(&self, frame: &GrayImage) -> Option<MarkerDetection> {
        let roi = self.roi(frame.width(), frame.height())?;
        let threshold = self.settings.bright_threshold;
        let (w, h) = (roi.width as usize, roi.height as usize);

        let mut region =
            imageops::crop_imm(frame, roi.left, roi.top, roi.width, roi.height).to_image();
        if self.settings.blur_sigma > 0.0 {
            region = imageops::blur(&region, self.settings.blur_sigma);
        }

        let bright: Vec<bool> = region.pixels().map(|px| px[0] > threshold).collect();

        let mut visited = vec![false; w * h];
        let mut best: Option<MarkerDetection> = None;
        let mut stack = Vec::new();

        for start in 0..w * h {
            if !bright[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            stack.push(start);
            let (mut area, mut sum_x, mut sum_y) = (0u64, 0u64, 0u64);
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0usize, 0usize);

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % w, idx / w);
                area += 1;
                sum_x += x as u64;
                sum_y += y as u64;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let n = ny * w + nx;
                        if bright[n] && !visited[n] {
                            visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            let area = area as u32;
            if area < self.settings.min_area || area > self.settings.max_area {
                continue;
            }
            if best.is_some_and(|b| b.area >= area) {
                continue;
            }

            let area64 = u64::from(area);
            best = Some(MarkerDetection {
                center: (
                    roi.left + (sum_x / area64) as u32,
                    roi.top + (sum_y / area64) as u32,
                ),
                bounds: Bounds {
                    x: roi.left + min_x as u32,
                    y: roi.top + min_y as u32,
                    width: (max_x - min_x + 1) as u32,
                    height: (max_y - min_y + 1) as u32,
                },
                area,
            });
        }

        best
    }

    fn roi(&self, width: u32, height: u32) -> Option<Roi> {
        let s = &self.settings;
        let frac = |f: f32, extent: u32| ((f.clamp(0.0, 1.0) * extent as f32) as u32).min(extent);

        let top = frac(s.roi_top, height);
        let bottom = frac(s.roi_bottom, height);
        let left = frac(s.roi_left, width);
        let right = frac(s.roi_right, width);
        if bottom <= top || right <= left {
            return None;
        }

        Some(Roi {
            left,
            top,
            width: right - left,
            height: bottom - top,
        })
    }
}
