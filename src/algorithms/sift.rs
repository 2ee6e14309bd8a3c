//! SIFT (Scale Invariant Feature Transform) detection and description.

use std::f32::consts::{PI, SQRT_2};

use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use log::trace;
use serde::{Deserialize, Serialize};

use super::scale_space::{difference, downsample, to_float, FloatImage};
use crate::{
    error::{ensure_parameter, Result},
    features::{Keypoint, FLOAT_DESCRIPTOR_DIMS},
};

/// Blur assumed to be present in the input raster
const ASSUMED_BLUR: f32 = 0.5;
/// Extrema closer than this to an octave border are ignored
const IMAGE_BORDER: usize = 5;
/// Octaves whose shorter side would drop below this are not built
const MIN_OCTAVE_SIDE: usize = 16;

const ORIENTATION_BINS: usize = 36;
const ORIENTATION_PEAK_RATIO: f32 = 0.8;
const ORIENTATION_SIGMA_FACTOR: f32 = 1.5;

/// Spatial cells per side of the descriptor grid
const DESCRIPTOR_WIDTH: usize = 4;
const DESCRIPTOR_BINS: usize = 8;
/// Width of one spatial cell in units of the keypoint scale
const DESCRIPTOR_SCALE_FACTOR: f32 = 3.0;
const DESCRIPTOR_MAGNITUDE_CLIP: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiftParams {
    /// Upper bound, fewer octaves are built for small images
    pub n_octaves: usize,
    /// Scales sampled per octave
    pub n_layers: usize,
    /// Blur of the first layer of every octave
    pub sigma: f32,
    /// Minimum |DoG| (intensities in `[0, 1]`), divided by `n_layers`
    pub contrast_threshold: f32,
    /// Maximum ratio of principal curvatures
    pub edge_threshold: f32,
    /// Keep only the strongest keypoints
    pub max_features: Option<usize>,
}

impl Default for SiftParams {
    fn default() -> Self {
        Self {
            n_octaves: 4,
            n_layers: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            max_features: None,
        }
    }
}

impl SiftParams {
    pub fn validate(&self) -> Result<()> {
        // octave indices are stored in a `u8`
        ensure_parameter((1..=256).contains(&self.n_octaves), "sift", "n_octaves")?;
        ensure_parameter(self.n_layers > 0, "sift", "n_layers")?;
        ensure_parameter(self.sigma.is_finite() && self.sigma > 0.0, "sift", "sigma")?;
        ensure_parameter(
            self.contrast_threshold.is_finite() && self.contrast_threshold >= 0.0,
            "sift",
            "contrast_threshold",
        )?;
        ensure_parameter(
            self.edge_threshold.is_finite() && self.edge_threshold >= 1.0,
            "sift",
            "edge_threshold",
        )
    }
}

/// Blur `image` from its assumed blur up to `sigma`
fn base_image(image: &GrayImage, sigma: f32) -> FloatImage {
    let delta = (sigma * sigma - ASSUMED_BLUR * ASSUMED_BLUR).max(0.01).sqrt();
    gaussian_blur_f32(&to_float(image), delta)
}

fn sample(image: &FloatImage, x: usize, y: usize) -> f32 {
    image.get_pixel(x as u32, y as u32).0[0]
}

/// `(gx, gy)` by central differences, `None` on the outermost pixels
fn gradient(image: &FloatImage, x: isize, y: isize) -> Option<(f32, f32)> {
    if x < 1 || y < 1 || x + 1 >= image.width() as isize || y + 1 >= image.height() as isize {
        return None;
    }
    let (x, y) = (x as usize, y as usize);
    Some((
        sample(image, x + 1, y) - sample(image, x - 1, y),
        sample(image, x, y + 1) - sample(image, x, y - 1),
    ))
}

struct Octave {
    gaussians: Vec<FloatImage>,
    dogs: Vec<FloatImage>,
}

#[derive(Debug, Clone)]
pub struct SiftDetector {
    pub params: SiftParams,
}

impl SiftDetector {
    pub fn new(params: SiftParams) -> Self {
        Self { params }
    }

    fn octave_count(&self, width: usize, height: usize) -> usize {
        let mut side = width.min(height);
        let mut count = 0;
        while side >= MIN_OCTAVE_SIDE && count < self.params.n_octaves {
            count += 1;
            side /= 2;
        }
        count
    }

    fn build_octaves(&self, image: &GrayImage) -> Vec<Octave> {
        let n_layers = self.params.n_layers.max(1);
        let k = 2f32.powf(1.0 / n_layers as f32);
        let count = self.octave_count(image.width() as usize, image.height() as usize);

        let mut octaves: Vec<Octave> = Vec::with_capacity(count);
        for o in 0..count {
            let first = match octaves.last() {
                None => base_image(image, self.params.sigma),
                Some(previous) => downsample(&previous.gaussians[n_layers]),
            };

            let mut gaussians = vec![first];
            for i in 1..n_layers + 3 {
                let previous_sigma = self.params.sigma * k.powi(i as i32 - 1);
                let total_sigma = previous_sigma * k;
                let delta = (total_sigma * total_sigma - previous_sigma * previous_sigma).sqrt();
                let next = gaussian_blur_f32(&gaussians[i - 1], delta);
                gaussians.push(next);
            }

            let dogs = gaussians
                .windows(2)
                .map(|pair| difference(&pair[1], &pair[0]))
                .collect();
            trace!("sift octave {o}: {}x{}", gaussians[0].width(), gaussians[0].height());

            octaves.push(Octave { gaussians, dogs });
        }

        octaves
    }

    /// Whether `(x, y)` on DoG `layer` is an extremum of its 3x3x3 neighbourhood
    fn is_extremum(dogs: &[FloatImage], layer: usize, x: usize, y: usize) -> bool {
        let value = sample(&dogs[layer], x, y);
        for dog in &dogs[layer - 1..=layer + 1] {
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let neighbour = sample(dog, nx, ny);
                    if (value > 0.0 && neighbour > value) || (value < 0.0 && neighbour < value) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Rejects extrema lying on edges, where one principal curvature dominates
    fn is_edge(&self, dog: &FloatImage, x: usize, y: usize) -> bool {
        let at = |x, y| sample(dog, x, y);
        let value = at(x, y);
        let dxx = at(x + 1, y) + at(x - 1, y) - 2.0 * value;
        let dyy = at(x, y + 1) + at(x, y - 1) - 2.0 * value;
        let dxy = (at(x + 1, y + 1) - at(x - 1, y + 1) - at(x + 1, y - 1) + at(x - 1, y - 1)) * 0.25;

        let trace = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let r = self.params.edge_threshold;
        det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det
    }

    /// Dominant gradient orientations around `(x, y)`, all peaks within 80% of the highest
    fn orientations(gaussian: &FloatImage, x: usize, y: usize, sigma: f32) -> Vec<f32> {
        let scale = ORIENTATION_SIGMA_FACTOR * sigma;
        let radius = (3.0 * scale).round() as isize;
        let weight_factor = -1.0 / (2.0 * scale * scale);

        let mut histogram = [0f32; ORIENTATION_BINS];
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let Some((gx, gy)) = gradient(gaussian, x as isize + dx, y as isize + dy) else {
                    continue;
                };
                let weight = (((dx * dx + dy * dy) as f32) * weight_factor).exp();
                let angle = gy.atan2(gx).rem_euclid(2.0 * PI);
                let bin = ((angle * ORIENTATION_BINS as f32 / (2.0 * PI)).round() as usize)
                    % ORIENTATION_BINS;
                histogram[bin] += weight * (gx * gx + gy * gy).sqrt();
            }
        }

        let n = ORIENTATION_BINS;
        let smoothed: Vec<f32> = (0..n)
            .map(|i| {
                (histogram[(i + n - 2) % n] + histogram[(i + 2) % n]) / 16.0
                    + (histogram[(i + n - 1) % n] + histogram[(i + 1) % n]) * 4.0 / 16.0
                    + histogram[i] * 6.0 / 16.0
            })
            .collect();

        let highest = smoothed.iter().copied().fold(0.0, f32::max);
        if highest <= 0.0 {
            return vec![0.0];
        }

        (0..n)
            .filter_map(|i| {
                let (left, value, right) = (smoothed[(i + n - 1) % n], smoothed[i], smoothed[(i + 1) % n]);
                if value > left && value > right && value >= ORIENTATION_PEAK_RATIO * highest {
                    // parabolic interpolation of the peak position
                    let offset = 0.5 * (left - right) / (left - 2.0 * value + right);
                    let bin = (i as f32 + offset).rem_euclid(n as f32);
                    Some(bin * 2.0 * PI / n as f32)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Keypoints ordered by descending |DoG| response
    pub fn detect(&self, image: &GrayImage) -> Vec<Keypoint> {
        let n_layers = self.params.n_layers.max(1);
        let threshold = self.params.contrast_threshold / n_layers as f32;
        let k = 2f32.powf(1.0 / n_layers as f32);

        let mut keypoints = Vec::new();
        for (o, octave) in self.build_octaves(image).iter().enumerate() {
            let (width, height) = (octave.dogs[0].width() as usize, octave.dogs[0].height() as usize);
            if width <= 2 * IMAGE_BORDER || height <= 2 * IMAGE_BORDER {
                continue;
            }
            let octave_scale = 2f32.powi(o as i32);

            for layer in 1..=n_layers {
                let dog = &octave.dogs[layer];
                let layer_sigma = self.params.sigma * k.powi(layer as i32);

                for y in IMAGE_BORDER..height - IMAGE_BORDER {
                    for x in IMAGE_BORDER..width - IMAGE_BORDER {
                        let value = sample(dog, x, y);
                        if value.abs() <= threshold
                            || !Self::is_extremum(&octave.dogs, layer, x, y)
                            || self.is_edge(dog, x, y)
                        {
                            continue;
                        }

                        let position = (x as f32 * octave_scale, y as f32 * octave_scale);
                        for angle in Self::orientations(&octave.gaussians[layer], x, y, layer_sigma) {
                            keypoints.push(
                                Keypoint::new(position.0, position.1)
                                    .with_response(value.abs())
                                    .with_size(2.0 * layer_sigma * octave_scale)
                                    .with_angle(angle)
                                    .with_octave(o as u8),
                            );
                        }
                    }
                }
            }
        }

        keypoints.sort_by(|a, b| b.response.unwrap_or(0.0).total_cmp(&a.response.unwrap_or(0.0)));
        if let Some(max) = self.params.max_features {
            keypoints.truncate(max);
        }
        keypoints
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiftDescriptorParams {
    /// Blur applied to the raster before sampling gradients
    pub sigma: f32,
}

impl Default for SiftDescriptorParams {
    fn default() -> Self {
        Self { sigma: 1.6 }
    }
}

impl SiftDescriptorParams {
    pub fn validate(&self) -> Result<()> {
        ensure_parameter(self.sigma.is_finite() && self.sigma > 0.0, "sift", "sigma")
    }
}

/// 4x4 grid of 8-bin gradient orientation histograms
#[derive(Debug, Clone)]
pub struct SiftExtractor {
    pub params: SiftDescriptorParams,
}

impl SiftExtractor {
    pub fn new(params: SiftDescriptorParams) -> Self {
        Self { params }
    }

    fn describe(&self, image: &FloatImage, keypoint: &Keypoint) -> Vec<f32> {
        let d = DESCRIPTOR_WIDTH as f32;
        let n = DESCRIPTOR_BINS;
        let (x, y) = (keypoint.x().round() as isize, keypoint.y().round() as isize);

        let scale = if keypoint.size > 0.0 {
            keypoint.size * 0.5
        } else {
            self.params.sigma
        };
        let cell_width = DESCRIPTOR_SCALE_FACTOR * scale;
        let diagonal = (image.width() as f32).hypot(image.height() as f32);
        let radius = (cell_width * SQRT_2 * (d + 1.0) * 0.5).round().min(diagonal) as isize;

        let angle = keypoint.angle.unwrap_or(0.0);
        let (sin_t, cos_t) = angle.sin_cos();
        let weight_factor = -1.0 / (0.5 * d * d);

        let mut histogram = vec![0f32; FLOAT_DESCRIPTOR_DIMS];
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                // offset in the keypoint frame, in cell units
                let c_rot = (dx as f32 * cos_t + dy as f32 * sin_t) / cell_width;
                let r_rot = (-(dx as f32) * sin_t + dy as f32 * cos_t) / cell_width;
                let r_bin = r_rot + d / 2.0 - 0.5;
                let c_bin = c_rot + d / 2.0 - 0.5;
                if r_bin <= -1.0 || r_bin >= d || c_bin <= -1.0 || c_bin >= d {
                    continue;
                }
                let Some((gx, gy)) = gradient(image, x + dx, y + dy) else {
                    continue;
                };

                let magnitude = (gx * gx + gy * gy).sqrt()
                    * ((c_rot * c_rot + r_rot * r_rot) * weight_factor).exp();
                let orientation = (gy.atan2(gx) - angle).rem_euclid(2.0 * PI);
                let o_bin = orientation * n as f32 / (2.0 * PI);

                let (r0, c0, o0) = (r_bin.floor(), c_bin.floor(), o_bin.floor());
                let (fr, fc, fo) = (r_bin - r0, c_bin - c0, o_bin - o0);

                for (dr, wr) in [(0, 1.0 - fr), (1, fr)] {
                    let r = r0 as isize + dr;
                    if !(0..DESCRIPTOR_WIDTH as isize).contains(&r) {
                        continue;
                    }
                    for (dc, wc) in [(0, 1.0 - fc), (1, fc)] {
                        let c = c0 as isize + dc;
                        if !(0..DESCRIPTOR_WIDTH as isize).contains(&c) {
                            continue;
                        }
                        for (d_o, wo) in [(0, 1.0 - fo), (1, fo)] {
                            let o = (o0 as usize + d_o) % n;
                            let cell = r as usize * DESCRIPTOR_WIDTH + c as usize;
                            histogram[cell * n + o] += magnitude * wr * wc * wo;
                        }
                    }
                }
            }
        }

        normalise(&mut histogram);
        for value in histogram.iter_mut() {
            *value = value.min(DESCRIPTOR_MAGNITUDE_CLIP);
        }
        normalise(&mut histogram);
        histogram
    }

    /// Keypoints outside the raster are removed from `keypoints`
    pub fn compute(&self, image: &GrayImage, keypoints: &mut Vec<Keypoint>) -> Vec<Vec<f32>> {
        let mut descriptors = Vec::with_capacity(keypoints.len());
        if image.width() == 0 || image.height() == 0 {
            keypoints.clear();
        }
        if keypoints.is_empty() {
            return descriptors;
        }

        let base = base_image(image, self.params.sigma);
        let (width, height) = (image.width() as f32, image.height() as f32);
        keypoints.retain(|keypoint| {
            let inside = keypoint.x() >= 0.0
                && keypoint.y() >= 0.0
                && keypoint.x().round() < width
                && keypoint.y().round() < height;
            if inside {
                descriptors.push(self.describe(&base, keypoint));
            }
            inside
        });

        descriptors
    }
}

/// Scale to unit length, leaves an all-zero vector untouched
fn normalise(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use image::Luma;

    use crate::features::euclidean;

    /// Gaussian blobs of alternating polarity on a grey background
    fn blobs() -> GrayImage {
        let centres = [(20.0, 20.0, 3.0), (60.0, 25.0, 4.0), (35.0, 60.0, 2.5), (70.0, 65.0, 3.5)];
        GrayImage::from_fn(96, 96, |x, y| {
            let mut value = 128.0;
            for (i, &(cx, cy, s)) in centres.iter().enumerate() {
                let r2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                value += sign * 110.0 * (-r2 / (2.0 * s * s)).exp();
            }
            Luma([value.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn finds_blobs() {
        let keypoints = SiftDetector::new(SiftParams::default()).detect(&blobs());
        assert!(!keypoints.is_empty());
        for pair in keypoints.windows(2) {
            assert!(pair[0].response >= pair[1].response);
        }
        // the strongest responses sit on the blob centres
        let strongest = &keypoints[0];
        assert!([(20.0, 20.0), (60.0, 25.0), (35.0, 60.0), (70.0, 65.0)]
            .iter()
            .any(|(cx, cy)| (strongest.x() - cx).abs() <= 3.0 && (strongest.y() - cy).abs() <= 3.0));
    }

    #[test]
    fn max_features_caps_output() {
        let params = SiftParams {
            max_features: Some(2),
            ..SiftParams::default()
        };
        assert!(SiftDetector::new(params).detect(&blobs()).len() <= 2);
    }

    #[test]
    fn flat_or_tiny_images_have_no_keypoints() {
        let detector = SiftDetector::new(SiftParams::default());
        assert!(detector.detect(&GrayImage::new(0, 0)).is_empty());
        assert!(detector.detect(&GrayImage::new(8, 8)).is_empty());
        assert!(detector
            .detect(&GrayImage::from_pixel(64, 64, Luma([90])))
            .is_empty());
    }

    #[test]
    fn descriptors_are_unit_length_and_aligned() {
        let image = blobs();
        let mut keypoints = SiftDetector::new(SiftParams::default()).detect(&image);
        keypoints.push(Keypoint::new(-4.0, 10.0));
        let descriptors = SiftExtractor::new(SiftDescriptorParams::default()).compute(&image, &mut keypoints);

        assert_eq!(descriptors.len(), keypoints.len());
        for descriptor in &descriptors {
            assert_eq!(descriptor.len(), FLOAT_DESCRIPTOR_DIMS);
            assert_relative_eq!(descriptor.iter().map(|v| v * v).sum::<f32>(), 1.0, epsilon = 1e-4);
            assert!(descriptor.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn translated_patch_gives_same_descriptor() {
        let image = blobs();
        let shifted = GrayImage::from_fn(96, 96, |x, y| {
            *image.get_pixel(x.saturating_sub(2), y.saturating_sub(3))
        });

        let extractor = SiftExtractor::new(SiftDescriptorParams::default());
        let mut a = vec![Keypoint::new(60.0, 25.0).with_size(6.0)];
        let mut b = vec![Keypoint::new(62.0, 28.0).with_size(6.0)];
        let da = extractor.compute(&image, &mut a);
        let db = extractor.compute(&shifted, &mut b);
        assert!(euclidean(&da[0], &db[0]) < 1e-4);

        let mut c = vec![Keypoint::new(20.0, 20.0).with_size(6.0)];
        let dc = extractor.compute(&image, &mut c);
        assert!(euclidean(&da[0], &dc[0]) > 0.1);
    }
}
