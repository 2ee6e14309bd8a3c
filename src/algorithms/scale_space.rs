//! Image pyramids and floating point Gaussian scale spaces shared by the
//! multi-scale detectors and extractors.

use image::{imageops, GrayImage, ImageBuffer, Luma};
use imageproc::map::map_colors;

/// Single channel `f32` raster with intensities scaled to `[0, 1]`
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

pub fn to_float(image: &GrayImage) -> FloatImage {
    map_colors(image, |p| Luma([p.0[0] as f32 / 255.0]))
}

/// Keep every second pixel in both directions
pub fn downsample(image: &FloatImage) -> FloatImage {
    FloatImage::from_fn(image.width() / 2, image.height() / 2, |x, y| {
        *image.get_pixel(2 * x, 2 * y)
    })
}

/// `a - b`, both images must share dimensions
pub fn difference(a: &FloatImage, b: &FloatImage) -> FloatImage {
    FloatImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0] - b.get_pixel(x, y).0[0]])
    })
}

/// Downscaled copies of `image`, level `l` shrunk by `scale_factor^l`.
///
/// Stops early once a level would be smaller than `min_side` in either direction.
pub fn pyramid(image: &GrayImage, levels: usize, scale_factor: f32, min_side: u32) -> Vec<GrayImage> {
    let mut pyramid = Vec::with_capacity(levels);
    if image.width() < min_side || image.height() < min_side {
        return pyramid;
    }
    pyramid.push(image.clone());

    for level in 1..levels {
        let scale = scale_factor.powi(level as i32);
        let width = (image.width() as f32 / scale).round() as u32;
        let height = (image.height() as f32 / scale).round() as u32;
        if width < min_side || height < min_side {
            break;
        }

        pyramid.push(imageops::resize(
            image,
            width,
            height,
            imageops::FilterType::Triangle,
        ));
    }

    pyramid
}
