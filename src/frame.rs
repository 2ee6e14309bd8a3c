use std::time::Duration;

use image::GrayImage;

use crate::features::{Descriptors, Keypoint, Match};

/// Wall-clock time spent in each stage of the pipeline
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimings {
    pub detection: Duration,
    pub description: Duration,
    pub matching: Duration,
}

/// One image of the stream together with everything derived from it.
///
/// `descriptors[i]` describes `keypoints[i]`. `matches` pair the previous frame's
/// keypoints (query side) with this frame's keypoints (reference side) and stay
/// empty for the first frame of a stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) image: GrayImage,
    /// Position of the frame in the stream, starting at 0
    pub sequence: u64,
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
    pub matches: Vec<Match>,
    pub timings: FrameTimings,
}

impl Frame {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            sequence: 0,
            keypoints: Vec::new(),
            descriptors: Descriptors::default(),
            matches: Vec::new(),
            timings: FrameTimings::default(),
        }
    }

    /// A frame whose keypoints were found and described elsewhere
    pub fn described(image: GrayImage, keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Self {
        Self {
            keypoints,
            descriptors,
            ..Self::new(image)
        }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Matched share of this frame's keypoints, `None` without keypoints
    pub fn match_ratio(&self) -> Option<f64> {
        if self.keypoints.is_empty() {
            return None;
        }
        Some(self.matches.len() as f64 / self.keypoints.len() as f64)
    }
}
