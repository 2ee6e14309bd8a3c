//! Keypoint detection stage.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        corners::CornerDetector,
        fast::fast_corners,
        orb::OrbDetector,
        sift::SiftDetector,
    },
    config::DetectorConfig,
    features::Keypoint,
};

/// Finds salient locations in a grayscale raster.
///
/// Detection never fails: an image too small (or too flat) for the algorithm
/// yields no keypoints.
pub trait KeypointDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FastParams {
    /// Intensity difference a circle pixel needs to count as brighter or darker
    pub threshold: u8,
    pub nonmax_suppression: bool,
}

impl Default for FastParams {
    fn default() -> Self {
        Self {
            threshold: 30,
            nonmax_suppression: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastDetector {
    pub params: FastParams,
}

impl FastDetector {
    pub fn new(params: FastParams) -> Self {
        Self { params }
    }
}

impl KeypointDetector for FastDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        fast_corners(image, self.params.threshold, self.params.nonmax_suppression)
            .into_iter()
            .map(|c| {
                // diameter of the Bresenham circle
                Keypoint::new(c.x as f32, c.y as f32)
                    .with_response(c.score)
                    .with_size(7.0)
            })
            .collect()
    }
}

impl KeypointDetector for CornerDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        CornerDetector::detect(self, image)
    }
}

impl KeypointDetector for OrbDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        OrbDetector::detect(self, image)
    }
}

impl KeypointDetector for SiftDetector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        SiftDetector::detect(self, image)
    }
}

/// The detector selected by a [`DetectorConfig`]
#[derive(Debug, Clone)]
pub enum Detector {
    Corners(CornerDetector),
    Fast(FastDetector),
    Orb(OrbDetector),
    Sift(SiftDetector),
}

impl From<&DetectorConfig> for Detector {
    fn from(config: &DetectorConfig) -> Self {
        match *config {
            DetectorConfig::ShiTomasi(params) => Self::Corners(CornerDetector::shi_tomasi(params)),
            DetectorConfig::Harris(params) => Self::Corners(CornerDetector::harris(params)),
            DetectorConfig::Fast(params) => Self::Fast(FastDetector::new(params)),
            DetectorConfig::Orb(params) => Self::Orb(OrbDetector::new(params)),
            DetectorConfig::Sift(params) => Self::Sift(SiftDetector::new(params)),
        }
    }
}

impl KeypointDetector for Detector {
    fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        match self {
            Self::Corners(detector) => KeypointDetector::detect(detector, image),
            Self::Fast(detector) => detector.detect(image),
            Self::Orb(detector) => KeypointDetector::detect(detector, image),
            Self::Sift(detector) => KeypointDetector::detect(detector, image),
        }
    }
}
