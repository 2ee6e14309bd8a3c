use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::features::Keypoint;

/// Axis aligned rectangle restricting which keypoints are kept.
///
/// Containment follows the usual half-open convention: the left and top edges are
/// inside, the right and bottom edges are not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Roi {
    /// The preceding vehicle in the KITTI `2011_09_26` drive, image_00
    pub const PRECEDING_VEHICLE: Roi = Roi::new(535.0, 180.0, 180.0, 150.0);

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: &Point2<f32>) -> bool {
        self.x <= point.x
            && point.x < self.x + self.width
            && self.y <= point.y
            && point.y < self.y + self.height
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Drop every keypoint outside `roi`, keeping the order of the survivors
pub fn filter_keypoints(keypoints: &mut Vec<Keypoint>, roi: &Roi) {
    keypoints.retain(|keypoint| roi.contains(&keypoint.position));
}

/// Limit `keypoints` to at most `max` entries.
///
/// When every keypoint has a response the strongest ones survive (earlier keypoints
/// win ties) and keep their relative order. Without a complete ranking the first
/// `max` keypoints are kept.
pub fn retain_best(keypoints: &mut Vec<Keypoint>, max: usize) {
    if keypoints.len() <= max {
        return;
    }

    let responses: Option<Vec<f32>> = keypoints.iter().map(|k| k.response).collect();
    let Some(responses) = responses else {
        keypoints.truncate(max);
        return;
    };

    let mut ranked: Vec<usize> = (0..keypoints.len()).collect();
    ranked.sort_by(|&a, &b| responses[b].total_cmp(&responses[a]));

    let mut keep = vec![false; keypoints.len()];
    for &i in &ranked[..max] {
        keep[i] = true;
    }

    let mut flags = keep.into_iter();
    keypoints.retain(|_| flags.next().unwrap_or(false));
}
