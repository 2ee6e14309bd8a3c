//! Structure-tensor corner detectors (Harris and Shi-Tomasi).
//!
//! Both share the same pipeline: Sobel gradients, a box-summed structure tensor,
//! a per-pixel corner strength, non-maximum suppression over a square window and
//! a greedy minimum-distance pass over the strongest survivors.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ensure_parameter, Result},
    features::Keypoint,
};

/// The two measures differ only in the strength formula and the NMS window,
/// everything else defaults to the same values
const DEFAULT_BLOCK_RADIUS: u32 = 2;
const DEFAULT_QUALITY_LEVEL: f32 = 0.01;
const DEFAULT_MIN_DISTANCE: f32 = 4.0;

/// Corner strength formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CornerMeasure {
    /// `det(M) - k * trace(M)^2`
    Harris,
    /// Smallest eigenvalue of `M`
    ShiTomasi,
}

/// Parameters shared by both corner measures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerParams {
    /// Half size of the window the structure tensor is summed over
    pub block_radius: u32,
    /// Harris free parameter, unused by Shi-Tomasi
    pub k: f32,
    /// Responses below `quality_level * strongest response` are discarded
    pub quality_level: f32,
    /// Half size of the non-maximum suppression window
    pub nms_radius: u32,
    /// Accepted corners are at least this far apart (pixels)
    pub min_distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarrisParams {
    pub block_radius: u32,
    pub k: f32,
    pub quality_level: f32,
    pub nms_radius: u32,
    pub min_distance: f32,
}

impl Default for HarrisParams {
    fn default() -> Self {
        Self {
            block_radius: DEFAULT_BLOCK_RADIUS,
            k: 0.04,
            quality_level: DEFAULT_QUALITY_LEVEL,
            nms_radius: 3,
            min_distance: DEFAULT_MIN_DISTANCE,
        }
    }
}

impl CornerParams {
    fn validate(&self, stage: &'static str) -> Result<()> {
        ensure_parameter((0.0..=1.0).contains(&self.quality_level), stage, "quality_level")?;
        ensure_parameter(
            self.min_distance.is_finite() && self.min_distance >= 0.0,
            stage,
            "min_distance",
        )
    }
}

impl HarrisParams {
    pub fn validate(&self) -> Result<()> {
        ensure_parameter(self.k.is_finite() && self.k > 0.0, "harris", "k")?;
        CornerParams::from(*self).validate("harris")
    }
}

impl From<HarrisParams> for CornerParams {
    fn from(params: HarrisParams) -> Self {
        Self {
            block_radius: params.block_radius,
            k: params.k,
            quality_level: params.quality_level,
            nms_radius: params.nms_radius,
            min_distance: params.min_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShiTomasiParams {
    pub block_radius: u32,
    pub quality_level: f32,
    pub nms_radius: u32,
    pub min_distance: f32,
}

impl Default for ShiTomasiParams {
    fn default() -> Self {
        Self {
            block_radius: DEFAULT_BLOCK_RADIUS,
            quality_level: DEFAULT_QUALITY_LEVEL,
            nms_radius: 1,
            min_distance: DEFAULT_MIN_DISTANCE,
        }
    }
}

impl ShiTomasiParams {
    pub fn validate(&self) -> Result<()> {
        CornerParams::from(*self).validate("shi_tomasi")
    }
}

impl From<ShiTomasiParams> for CornerParams {
    fn from(params: ShiTomasiParams) -> Self {
        Self {
            block_radius: params.block_radius,
            k: 0.0,
            quality_level: params.quality_level,
            nms_radius: params.nms_radius,
            min_distance: params.min_distance,
        }
    }
}

/// Dense corner strength map, zero where the block does not fit in the image
pub struct ResponseMap {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct CornerDetector {
    pub measure: CornerMeasure,
    pub params: CornerParams,
}

impl CornerDetector {
    pub fn new(measure: CornerMeasure, params: CornerParams) -> Self {
        Self { measure, params }
    }

    pub fn harris(params: HarrisParams) -> Self {
        Self::new(CornerMeasure::Harris, params.into())
    }

    pub fn shi_tomasi(params: ShiTomasiParams) -> Self {
        Self::new(CornerMeasure::ShiTomasi, params.into())
    }

    pub fn response_map(&self, image: &GrayImage) -> Option<ResponseMap> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        // the Sobel kernel itself needs one extra pixel of margin
        let margin = self.params.block_radius as usize + 1;
        if width <= 2 * margin || height <= 2 * margin {
            return None;
        }

        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);

        let mut xx = vec![0f64; width * height];
        let mut yy = vec![0f64; width * height];
        let mut xy = vec![0f64; width * height];
        for (x, y, g) in gx.enumerate_pixels() {
            let ix = g.0[0] as f64;
            let iy = gy.get_pixel(x, y).0[0] as f64;
            let i = y as usize * width + x as usize;
            xx[i] = ix * ix;
            yy[i] = iy * iy;
            xy[i] = ix * iy;
        }

        let r = self.params.block_radius as usize;
        let mut values = vec![0f64; width * height];
        for y in margin..height - margin {
            for x in margin..width - margin {
                let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
                for by in y - r..=y + r {
                    for bx in x - r..=x + r {
                        let i = by * width + bx;
                        sxx += xx[i];
                        syy += yy[i];
                        sxy += xy[i];
                    }
                }

                let trace = sxx + syy;
                values[y * width + x] = match self.measure {
                    CornerMeasure::Harris => {
                        sxx * syy - sxy * sxy - self.params.k as f64 * trace * trace
                    }
                    CornerMeasure::ShiTomasi => {
                        let spread = ((sxx - syy) * (sxx - syy) + 4.0 * sxy * sxy).sqrt();
                        0.5 * (trace - spread)
                    }
                };
            }
        }

        Some(ResponseMap {
            width,
            height,
            values,
        })
    }

    /// Corners ordered by descending strength
    pub fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let Some(map) = self.response_map(image) else {
            return Vec::new();
        };

        let strongest = map.values.iter().copied().fold(0.0, f64::max);
        if strongest <= 0.0 {
            return Vec::new();
        }
        let threshold = strongest * self.params.quality_level as f64;

        let mut maxima = suppress_non_maxima(&map, self.params.nms_radius as usize, threshold);
        // stable: equal responses stay in scan order
        maxima.sort_by(|a, b| b.2.total_cmp(&a.2));

        let size = (2 * self.params.block_radius + 1) as f32;
        let min_distance_sq = self.params.min_distance * self.params.min_distance;

        let mut corners: Vec<Keypoint> = Vec::new();
        for (x, y, response) in maxima {
            let (x, y) = (x as f32, y as f32);
            let too_close = corners.iter().any(|c| {
                let (dx, dy) = (c.x() - x, c.y() - y);
                dx * dx + dy * dy < min_distance_sq
            });

            if !too_close {
                corners.push(
                    Keypoint::new(x, y)
                        .with_response(response as f32)
                        .with_size(size),
                );
            }
        }

        corners
    }
}

/// Local maxima of `map` above `threshold`, in scan order.
///
/// A pixel survives when no neighbour within `radius` is stronger. Among equal
/// responses only the first one in row-major order survives.
pub fn suppress_non_maxima(map: &ResponseMap, radius: usize, threshold: f64) -> Vec<(usize, usize, f64)> {
    let (width, height) = (map.width, map.height);
    let mut maxima = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let value = map.values[y * width + x];
            if value <= threshold {
                continue;
            }

            let mut is_max = true;
            'window: for ny in y.saturating_sub(radius)..(y + radius + 1).min(height) {
                for nx in x.saturating_sub(radius)..(x + radius + 1).min(width) {
                    if (nx, ny) == (x, y) {
                        continue;
                    }
                    let neighbour = map.values[ny * width + nx];
                    let earlier = (ny, nx) < (y, x);
                    if neighbour > value || (earlier && neighbour == value) {
                        is_max = false;
                        break 'window;
                    }
                }
            }

            if is_max {
                maxima.push((x, y, value));
            }
        }
    }

    maxima
}
