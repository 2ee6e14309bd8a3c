use bitarray::BitArray;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Number of bytes in every binary descriptor produced by this crate (256 bits)
pub const BINARY_DESCRIPTOR_BYTES: usize = 256 / u8::BITS as usize;

/// Dimensionality of the floating-point (SIFT) descriptor
pub const FLOAT_DESCRIPTOR_DIMS: usize = 128;

pub type BinaryDescriptor = [u8; BINARY_DESCRIPTOR_BYTES];

/// A salient image location.
///
/// Keypoints carry no identity of their own, a keypoint is addressed by its
/// index within the frame that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub position: Point2<f32>,
    /// Diameter of the neighbourhood the detector considered meaningful
    pub size: f32,
    /// Orientation in radians, when the detector assigns one
    pub angle: Option<f32>,
    /// Detector strength, `None` when the detector has no quality ranking
    pub response: Option<f32>,
    /// Pyramid level the keypoint was found on
    pub octave: u8,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            size: 1.0,
            angle: None,
            response: None,
            octave: 0,
        }
    }

    pub fn with_response(mut self, response: f32) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = Some(angle);
        self
    }

    pub fn with_octave(mut self, octave: u8) -> Self {
        self.octave = octave;
        self
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorFormat {
    /// Bitstrings compared with the Hamming distance
    Binary,
    /// Real vectors compared with the Euclidean distance
    Float,
}

/// The descriptors of one frame, index-aligned with its keypoints.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Binary(Vec<BinaryDescriptor>),
    Float(Vec<Vec<f32>>),
}

impl Descriptors {
    pub fn empty(format: DescriptorFormat) -> Self {
        match format {
            DescriptorFormat::Binary => Self::Binary(Vec::new()),
            DescriptorFormat::Float => Self::Float(Vec::new()),
        }
    }

    pub fn format(&self) -> DescriptorFormat {
        match self {
            Self::Binary(_) => DescriptorFormat::Binary,
            Self::Float(_) => DescriptorFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(descriptors) => descriptors.len(),
            Self::Float(descriptors) => descriptors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Descriptors {
    fn default() -> Self {
        Self::Binary(Vec::new())
    }
}

/// Hamming distance between two binary descriptors
pub fn hamming(a: &BinaryDescriptor, b: &BinaryDescriptor) -> u32 {
    BitArray::new(*a).distance(&BitArray::new(*b))
}

/// Euclidean distance between two float descriptors of equal length
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

/// A correspondence between a query keypoint and a reference keypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub query_index: usize,
    pub reference_index: usize,
    /// Descriptor distance, smaller means more similar
    pub distance: f32,
}
