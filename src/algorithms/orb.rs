//! ORB (Oriented FAST and Rotated BRIEF).
//!
//! Detection runs FAST-9 on every level of an image pyramid, ranks the corners
//! by a Harris score and orients each one with the intensity centroid of its
//! patch. Description samples a fixed BRIEF pattern rotated by that orientation
//! on the pyramid level the keypoint came from.

use image::GrayImage;
use log::trace;
use nalgebra::{Rotation2, Vector2};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{
    brief::{pack_comparisons, sampling_pattern, SamplePair},
    corners::{CornerDetector, HarrisParams},
    fast::fast_corners,
    scale_space::pyramid,
};
use crate::{
    error::{ensure_parameter, Result},
    features::{BinaryDescriptor, Keypoint},
};

/// Keypoint octaves are stored in a `u8`
const MAX_LEVELS: usize = u8::MAX as usize + 1;

/// Checks shared by the detector and extractor pyramids
fn validate_pyramid(stage: &'static str, scale_factor: f32, n_levels: usize) -> Result<()> {
    ensure_parameter(
        scale_factor.is_finite() && scale_factor > 1.0,
        stage,
        "scale_factor",
    )?;
    ensure_parameter((1..=MAX_LEVELS).contains(&n_levels), stage, "n_levels")
}

/// Radius of the circular patch used for the intensity centroid
const CENTROID_RADIUS: i32 = 15;

/// Pattern coordinates are clamped to this, so any rotation stays within
/// `PATTERN_EXTENT * sqrt(2)` of the keypoint
const PATTERN_EXTENT: i8 = 13;

/// Margin a keypoint needs on its pyramid level to be described
pub const DESCRIPTOR_MARGIN: i32 = 20;

/// Patch diameter at level 0
const PATCH_SIZE: f32 = 31.0;

static ORB_PATTERN: Lazy<Vec<SamplePair>> =
    Lazy::new(|| sampling_pattern(31, PATCH_SIZE as f64 / 5.0, PATTERN_EXTENT));

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrbParams {
    /// Keypoints kept across all pyramid levels
    pub n_features: usize,
    pub scale_factor: f32,
    pub n_levels: usize,
    pub fast_threshold: u8,
    /// Corners closer than this to a level's border are ignored
    pub edge_threshold: u32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            fast_threshold: 20,
            edge_threshold: DESCRIPTOR_MARGIN as u32,
        }
    }
}

impl OrbParams {
    pub fn validate(&self) -> Result<()> {
        ensure_parameter(self.n_features > 0, "orb", "n_features")?;
        validate_pyramid("orb", self.scale_factor, self.n_levels)
    }
}

/// Smallest level side still worth searching
fn min_level_side(edge_threshold: u32) -> u32 {
    edge_threshold.saturating_mul(2).saturating_add(1)
}

/// Orientation of the patch around `(x, y)` from its first order moments.
///
/// The patch is clipped to the image.
pub fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32) -> f32 {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let (mut m01, mut m10) = (0f64, 0f64);

    for dy in -CENTROID_RADIUS..=CENTROID_RADIUS {
        for dx in -CENTROID_RADIUS..=CENTROID_RADIUS {
            let (px, py) = (x + dx, y + dy);
            if dx * dx + dy * dy > CENTROID_RADIUS * CENTROID_RADIUS
                || px < 0
                || py < 0
                || px >= width
                || py >= height
            {
                continue;
            }

            let intensity = image.get_pixel(px as u32, py as u32).0[0] as f64;
            m10 += dx as f64 * intensity;
            m01 += dy as f64 * intensity;
        }
    }

    m01.atan2(m10) as f32
}

#[derive(Debug, Clone)]
pub struct OrbDetector {
    pub params: OrbParams,
}

impl OrbDetector {
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }

    pub fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let params = &self.params;
        let harris = CornerDetector::harris(HarrisParams {
            block_radius: 3,
            ..HarrisParams::default()
        });

        let levels = pyramid(
            image,
            params.n_levels,
            params.scale_factor,
            min_level_side(params.edge_threshold),
        );

        let mut keypoints = Vec::new();
        for (level, level_image) in levels.iter().enumerate() {
            let scale = params.scale_factor.powi(level as i32);
            let Some(responses) = harris.response_map(level_image) else {
                continue;
            };

            let border = params.edge_threshold;
            let (width, height) = level_image.dimensions();
            let corners: Vec<_> = fast_corners(level_image, params.fast_threshold, true)
                .into_iter()
                .filter(|c| {
                    c.x >= border && c.y >= border && c.x + border < width && c.y + border < height
                })
                .collect();
            trace!("orb level {level}: {} corners", corners.len());

            keypoints.extend(corners.into_iter().map(|c| {
                let response = responses.values[c.y as usize * responses.width + c.x as usize];
                Keypoint::new(c.x as f32 * scale, c.y as f32 * scale)
                    .with_response(response as f32)
                    .with_size(PATCH_SIZE * scale)
                    .with_angle(intensity_centroid_angle(level_image, c.x as i32, c.y as i32))
                    .with_octave(level as u8)
            }));
        }

        // stable: ties keep level then score order
        keypoints.sort_by(|a, b| b.response.unwrap_or(0.0).total_cmp(&a.response.unwrap_or(0.0)));
        keypoints.truncate(params.n_features);
        keypoints
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrbDescriptorParams {
    /// Must agree with the detector that produced the keypoints for octaves > 0
    pub scale_factor: f32,
    pub n_levels: usize,
    pub smoothing_sigma: f32,
}

impl Default for OrbDescriptorParams {
    fn default() -> Self {
        let detector = OrbParams::default();
        Self {
            scale_factor: detector.scale_factor,
            n_levels: detector.n_levels,
            smoothing_sigma: 2.0,
        }
    }
}

impl OrbDescriptorParams {
    pub fn validate(&self) -> Result<()> {
        validate_pyramid("orb", self.scale_factor, self.n_levels)?;
        let sigma = self.smoothing_sigma;
        ensure_parameter(sigma.is_finite() && sigma > 0.0, "orb", "smoothing_sigma")
    }
}

/// Steered BRIEF extractor
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    pub params: OrbDescriptorParams,
}

impl OrbExtractor {
    pub fn new(params: OrbDescriptorParams) -> Self {
        Self { params }
    }

    /// Keypoints without an angle are oriented here, keypoints that cannot be
    /// described on their level are removed from `keypoints`
    pub fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Vec<BinaryDescriptor> {
        let mut descriptors = Vec::with_capacity(keypoints.len());
        if keypoints.is_empty() {
            return descriptors;
        }

        let deepest = keypoints.iter().map(|k| k.octave as usize).max().unwrap_or(0);
        let levels: Vec<GrayImage> = pyramid(
            image,
            (deepest + 1).min(self.params.n_levels.max(1)),
            self.params.scale_factor,
            1,
        );
        let smoothed: Vec<GrayImage> = levels
            .iter()
            .map(|level| imageproc::filter::gaussian_blur_f32(level, self.params.smoothing_sigma))
            .collect();

        keypoints.retain_mut(|keypoint| {
            let level = keypoint.octave as usize;
            let (Some(raw), Some(blurred)) = (levels.get(level), smoothed.get(level)) else {
                return false;
            };

            let scale = self.params.scale_factor.powi(level as i32);
            let x = (keypoint.x() / scale).round() as i32;
            let y = (keypoint.y() / scale).round() as i32;
            let (width, height) = (raw.width() as i32, raw.height() as i32);
            if x < DESCRIPTOR_MARGIN
                || y < DESCRIPTOR_MARGIN
                || x + DESCRIPTOR_MARGIN >= width
                || y + DESCRIPTOR_MARGIN >= height
            {
                return false;
            }

            let angle = *keypoint
                .angle
                .get_or_insert_with(|| intensity_centroid_angle(raw, x, y));
            let rotation = Rotation2::new(angle);
            let steer = |dx: i8, dy: i8| {
                let p = rotation * Vector2::new(dx as f32, dy as f32);
                (x + p.x.round() as i32, y + p.y.round() as i32)
            };

            descriptors.push(pack_comparisons(
                blurred,
                ORB_PATTERN
                    .iter()
                    .map(|&[x1, y1, x2, y2]| (steer(x1, y1), steer(x2, y2))),
            ));
            true
        });

        descriptors
    }
}
