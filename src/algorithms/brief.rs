use image::GrayImage;
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ensure_parameter, Result},
    features::{BinaryDescriptor, Keypoint, BINARY_DESCRIPTOR_BYTES},
};

/// One bit per sampled pair
pub const PAIRS: usize = BINARY_DESCRIPTOR_BYTES * u8::BITS as usize;

/// Half width of the square patch BRIEF samples from
pub const PATCH_RADIUS: i32 = 16;

/// A sampling pair `[x1, y1, x2, y2]` relative to the keypoint
pub type SamplePair = [i8; 4];

/// Draw `PAIRS` point pairs from an isotropic Gaussian, clamped to `extent`.
///
/// A fixed seed keeps the pattern identical across frames and runs, which is what
/// makes descriptors from different frames comparable at all.
pub fn sampling_pattern(seed: u64, sigma: f64, extent: i8) -> Vec<SamplePair> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = match Normal::new(0.0, sigma) {
        Ok(normal_dist) => normal_dist,
        Err(_) => return vec![[0; 4]; PAIRS],
    };

    let limit = extent as f64;
    let mut sample = || normal_dist.sample(&mut rng).round().clamp(-limit, limit) as i8;

    (0..PAIRS)
        .map(|_| [sample(), sample(), sample(), sample()])
        .collect()
}

/// The BRIEF-256 pattern: sigma^2 = S^2 / 25 for a patch of side S
static BRIEF_PATTERN: Lazy<Vec<SamplePair>> =
    Lazy::new(|| sampling_pattern(42, (2 * PATCH_RADIUS) as f64 / 5.0, PATCH_RADIUS as i8));

/// Pack intensity comparisons into a descriptor, bit `i` is set when the first point
/// of pair `i` is brighter than the second.
///
/// Callers guarantee every sampled location lies inside `image`.
pub fn pack_comparisons(
    image: &GrayImage,
    pairs: impl Iterator<Item = ((i32, i32), (i32, i32))>,
) -> BinaryDescriptor {
    let mut descriptor = [0; BINARY_DESCRIPTOR_BYTES];
    for (i, ((x1, y1), (x2, y2))) in pairs.enumerate().take(PAIRS) {
        let first = image.get_pixel(x1 as u32, y1 as u32).0[0];
        let second = image.get_pixel(x2 as u32, y2 as u32).0[0];
        if first > second {
            descriptor[i / 8] |= 1 << (i % 8);
        }
    }
    descriptor
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BriefParams {
    /// Standard deviation of the Gaussian applied before sampling, so that single
    /// pixel noise does not flip comparisons
    pub smoothing_sigma: f32,
}

impl Default for BriefParams {
    fn default() -> Self {
        Self {
            smoothing_sigma: 2.0,
        }
    }
}

impl BriefParams {
    pub fn validate(&self) -> Result<()> {
        let sigma = self.smoothing_sigma;
        ensure_parameter(sigma.is_finite() && sigma > 0.0, "brief", "smoothing_sigma")
    }
}

/// BRIEF (Binary Robust Independent Elementary Features) extractor
#[derive(Debug, Clone)]
pub struct BriefExtractor {
    pub params: BriefParams,
}

impl BriefExtractor {
    pub fn new(params: BriefParams) -> Self {
        Self { params }
    }

    /// Keypoints whose patch leaves the image are removed from `keypoints`
    pub fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Vec<BinaryDescriptor> {
        let mut descriptors = Vec::with_capacity(keypoints.len());
        let (width, height) = (image.width() as i32, image.height() as i32);
        if width <= 2 * PATCH_RADIUS || height <= 2 * PATCH_RADIUS {
            keypoints.clear();
        }
        if keypoints.is_empty() {
            return descriptors;
        }

        let smoothed = imageproc::filter::gaussian_blur_f32(image, self.params.smoothing_sigma);

        keypoints.retain(|keypoint| {
            let x = keypoint.x().round() as i32;
            let y = keypoint.y().round() as i32;
            let inside = x - PATCH_RADIUS >= 0
                && y - PATCH_RADIUS >= 0
                && x + PATCH_RADIUS < width
                && y + PATCH_RADIUS < height;
            if inside {
                descriptors.push(pack_comparisons(
                    &smoothed,
                    BRIEF_PATTERN.iter().map(|&[x1, y1, x2, y2]| {
                        (
                            (x + x1 as i32, y + y1 as i32),
                            (x + x2 as i32, y + y2 as i32),
                        )
                    }),
                ));
            }
            inside
        });

        descriptors
    }
}
