//! Descriptor extraction stage.

use image::GrayImage;

use crate::{
    algorithms::{brief::BriefExtractor, orb::OrbExtractor, sift::SiftExtractor},
    config::DescriptorConfig,
    features::{DescriptorFormat, Descriptors, Keypoint},
};

/// Describes the neighbourhood of every keypoint.
///
/// Keypoints that cannot be described (their patch leaves the raster) are removed
/// from `keypoints`, so that on return the i-th descriptor belongs to the i-th
/// keypoint. Extractors may fill in keypoint attributes such as the orientation.
pub trait DescriptorExtractor {
    fn format(&self) -> DescriptorFormat;
    fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Descriptors;
}

impl DescriptorExtractor for BriefExtractor {
    fn format(&self) -> DescriptorFormat {
        DescriptorFormat::Binary
    }

    fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Descriptors {
        Descriptors::Binary(BriefExtractor::compute(self, image, keypoints))
    }
}

impl DescriptorExtractor for OrbExtractor {
    fn format(&self) -> DescriptorFormat {
        DescriptorFormat::Binary
    }

    fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Descriptors {
        Descriptors::Binary(OrbExtractor::compute(self, image, keypoints))
    }
}

impl DescriptorExtractor for SiftExtractor {
    fn format(&self) -> DescriptorFormat {
        DescriptorFormat::Float
    }

    fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Descriptors {
        Descriptors::Float(SiftExtractor::compute(self, image, keypoints))
    }
}

/// The extractor selected by a [`DescriptorConfig`]
#[derive(Debug, Clone)]
pub enum Extractor {
    Brief(BriefExtractor),
    Orb(OrbExtractor),
    Sift(SiftExtractor),
}

impl From<&DescriptorConfig> for Extractor {
    fn from(config: &DescriptorConfig) -> Self {
        match *config {
            DescriptorConfig::Brief(params) => Self::Brief(BriefExtractor::new(params)),
            DescriptorConfig::Orb(params) => Self::Orb(OrbExtractor::new(params)),
            DescriptorConfig::Sift(params) => Self::Sift(SiftExtractor::new(params)),
        }
    }
}

impl DescriptorExtractor for Extractor {
    fn format(&self) -> DescriptorFormat {
        match self {
            Self::Brief(extractor) => DescriptorExtractor::format(extractor),
            Self::Orb(extractor) => DescriptorExtractor::format(extractor),
            Self::Sift(extractor) => DescriptorExtractor::format(extractor),
        }
    }

    fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Descriptors {
        match self {
            Self::Brief(extractor) => DescriptorExtractor::compute(extractor, image, keypoints),
            Self::Orb(extractor) => DescriptorExtractor::compute(extractor, image, keypoints),
            Self::Sift(extractor) => DescriptorExtractor::compute(extractor, image, keypoints),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn all_extractors() -> Vec<Extractor> {
        ["BRIEF", "ORB", "SIFT"]
            .iter()
            .map(|name| Extractor::from(&name.parse::<DescriptorConfig>().unwrap()))
            .collect()
    }

    fn smooth_noise(seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = GrayImage::from_fn(120, 90, |_, _| image::Luma([rng.gen()]));
        imageproc::filter::gaussian_blur_f32(&noise, 1.5)
    }

    #[test]
    fn descriptors_stay_aligned_with_keypoints() {
        let image = smooth_noise(7);
        for extractor in all_extractors() {
            let mut keypoints = vec![
                Keypoint::new(2.0, 2.0),
                Keypoint::new(60.0, 45.0),
                Keypoint::new(119.0, 40.0),
                Keypoint::new(40.0, 30.0),
                Keypoint::new(80.0, 60.0),
            ];
            let descriptors = extractor.compute(&image, &mut keypoints);

            assert_eq!(descriptors.len(), keypoints.len(), "{extractor:?}");
            assert_eq!(descriptors.format(), extractor.format());
            // interior keypoints are always describable
            assert!(keypoints.iter().any(|k| (k.x(), k.y()) == (60.0, 45.0)));
        }
    }

    #[test]
    fn empty_keypoints_give_empty_descriptors() {
        let image = smooth_noise(8);
        for extractor in all_extractors() {
            let descriptors = extractor.compute(&image, &mut Vec::new());
            assert!(descriptors.is_empty());
            assert_eq!(descriptors.format(), extractor.format());

            let mut keypoints = vec![Keypoint::new(10.0, 10.0)];
            let descriptors = extractor.compute(&GrayImage::new(0, 0), &mut keypoints);
            assert!(descriptors.is_empty() && keypoints.is_empty(), "{extractor:?}");
        }
    }
}
