use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};

use super::corners::{suppress_non_maxima, ResponseMap};

/// FAST-9 needs a Bresenham circle of radius 3 around each candidate
const MIN_SIDE: u32 = 7;

/// Uses FAST (Features from Accelerated Segment Test) to find corners in a
/// grayscale image, strongest first.
///
/// With `nonmax` set, corners that have a stronger (or equally strong, earlier)
/// corner among their 8 neighbours are dropped.
pub fn fast_corners(image: &GrayImage, threshold: u8, nonmax: bool) -> Vec<Corner> {
    if image.width() < MIN_SIDE || image.height() < MIN_SIDE {
        return Vec::new();
    }

    let mut corners = corners_fast9(image, threshold);

    if nonmax {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut values = vec![0f64; width * height];
        for corner in &corners {
            values[corner.y as usize * width + corner.x as usize] = corner.score as f64;
        }

        let map = ResponseMap {
            width,
            height,
            values,
        };
        corners = suppress_non_maxima(&map, 1, 0.0)
            .into_iter()
            .map(|(x, y, score)| Corner {
                x: x as u32,
                y: y as u32,
                score: score as f32,
            })
            .collect();
    }

    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    corners
}
