use image::imageops::grayscale;
use image::{GrayImage, RgbImage};

/// Variance of the 4-neighbour Laplacian over the interior pixels.
///
/// Higher is sharper. Images narrower or shorter than 3 pixels score 0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();

    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    // Laplacian kernel: [0, 1, 0; 1, -4, 1; 0, 1, 0]
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray.get_pixel(x, y).0[0] as f64;
            let top = gray.get_pixel(x, y - 1).0[0] as f64;
            let bottom = gray.get_pixel(x, y + 1).0[0] as f64;
            let left = gray.get_pixel(x - 1, y).0[0] as f64;
            let right = gray.get_pixel(x + 1, y).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;

            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64) - (mean * mean)
}

/// Sharpness of a decoded video frame
pub fn sharpness_score(frame: &RgbImage) -> f64 {
    laplacian_variance(&grayscale(frame))
}

/// A frame is kept when its score reaches the threshold
pub fn is_sharp(score: f64, threshold: f64) -> bool {
    score >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::test_support::{checkerboard, flat};

    #[test]
    fn test_flat_image_has_zero_variance() {
        assert_eq!(sharpness_score(&flat(32, 32, 128)), 0.0);
    }

    #[test]
    fn test_checkerboard_is_sharp() {
        let score = sharpness_score(&checkerboard(32, 32, 1));
        assert!(score > 100.0, "score was {}", score);
        assert!(is_sharp(score, 100.0));
    }

    #[test]
    fn test_tiny_frames_score_zero() {
        assert_eq!(sharpness_score(&checkerboard(2, 10, 1)), 0.0);
    }

    #[test]
    fn test_colour_edges_count_through_luma() {
        let frame = RgbImage::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let expected = laplacian_variance(&grayscale(&frame));
        assert!(expected > 0.0);
        assert_eq!(sharpness_score(&frame), expected);
        assert!(sharpness_score(&frame) < sharpness_score(&checkerboard(32, 32, 1)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(is_sharp(100.0, 100.0));
        assert!(!is_sharp(99.0, 100.0));
    }
}
