use thiserror::Error;

use crate::{config::MatcherMetric, features::DescriptorFormat};

pub type Result<T> = std::result::Result<T, TrackError>;

/// Everything that can go wrong while configuring or driving a [`crate::Tracker`].
///
/// Empty rasters, empty keypoint sets and empty descriptor sets are not errors,
/// they flow through the pipeline as empty sequences.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("{metric:?} distance cannot compare {format:?} descriptors")]
    IncompatibleMetric {
        metric: MatcherMetric,
        format: DescriptorFormat,
    },

    #[error("cannot match {query:?} descriptors against {reference:?} descriptors")]
    FormatMismatch {
        query: DescriptorFormat,
        reference: DescriptorFormat,
    },

    #[error("unknown {stage} variant `{name}`")]
    UnknownVariant { stage: &'static str, name: String },

    #[error("frame window capacity must be at least 2, got {0}")]
    InvalidCapacity(usize),

    #[error("ratio threshold must lie in (0, 1], got {0}")]
    InvalidRatio(f32),

    #[error("region of interest must have a positive width and height")]
    InvalidRoi,

    #[error("keypoint cap must be positive")]
    InvalidKeypointCap,

    #[error("{stage} parameter `{parameter}` is out of range")]
    InvalidParameter {
        stage: &'static str,
        parameter: &'static str,
    },

    #[error("frame has {keypoints} keypoints but {descriptors} descriptors")]
    MisalignedFrame { keypoints: usize, descriptors: usize },

    #[error("window index {index} is out of range for {len} resident frames")]
    OutOfRange { index: usize, len: usize },
}

/// `Ok` when `valid`, [`TrackError::InvalidParameter`] otherwise
pub(crate) fn ensure_parameter(
    valid: bool,
    stage: &'static str,
    parameter: &'static str,
) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(TrackError::InvalidParameter { stage, parameter })
    }
}
