use image::{GrayImage, Luma};

use crate::models::ProbabilityMap;

/// Foreground (255) where the probability is strictly above `threshold`
pub fn binarize_map(map: &ProbabilityMap, threshold: f32) -> GrayImage {
    GrayImage::from_fn(map.width() as u32, map.height() as u32, |x, y| {
        if map.get(x as usize, y as usize) > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Foreground (255) where the pixel is at or above `threshold`
pub fn threshold_binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] >= threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Convert grayscale image to a foreground mask using Otsu's threshold
pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    threshold_binarize(gray, calculate_otsu_threshold(gray.as_raw()))
}

/// Calculate Otsu's optimal threshold
pub fn calculate_otsu_threshold(gray: &[u8]) -> u8 {
    // Build histogram
    let mut histogram = [0u64; 256];
    for &pixel in gray {
        histogram[pixel as usize] += 1;
    }

    let total_pixels = gray.len() as f64;
    if total_pixels == 0.0 {
        return 128;
    }
    let total_sum: u64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as u64 * c)
        .sum();

    let mut max_variance = 0.0;
    let mut optimal_threshold = 128u8;
    let mut class1_pixels = 0u64;
    let mut class1_sum = 0u64;

    // Class 1 holds intensities strictly below the candidate threshold
    for threshold in 1..=255usize {
        class1_pixels += histogram[threshold - 1];
        class1_sum += (threshold as u64 - 1) * histogram[threshold - 1];
        let class2_pixels = gray.len() as u64 - class1_pixels;

        if class1_pixels == 0 || class2_pixels == 0 {
            continue;
        }

        let class1_mean = class1_sum as f64 / class1_pixels as f64;
        let class2_mean = (total_sum - class1_sum) as f64 / class2_pixels as f64;

        let weight1 = class1_pixels as f64 / total_pixels;
        let weight2 = class2_pixels as f64 / total_pixels;

        let variance = weight1 * weight2 * (class1_mean - class2_mean).powi(2);

        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = threshold as u8;
        }
    }

    optimal_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_binarize() {
        let gray = GrayImage::from_raw(2, 2, vec![100, 150, 200, 50]).unwrap();
        let binary = threshold_binarize(&gray, 128);

        assert_eq!(binary.get_pixel(0, 0)[0], 0); // 100 < 128
        assert_eq!(binary.get_pixel(1, 0)[0], 255);
        assert_eq!(binary.get_pixel(0, 1)[0], 255);
        assert_eq!(binary.get_pixel(1, 1)[0], 0); // 50 < 128
    }

    #[test]
    fn test_otsu_binarize() {
        // Dark top half, light bottom half
        let mut raw = vec![50u8; 50];
        raw.extend(vec![200u8; 50]);
        let gray = GrayImage::from_raw(10, 10, raw).unwrap();

        let t = calculate_otsu_threshold(gray.as_raw());
        assert!(t > 50 && t <= 200, "threshold {}", t);

        let binary = otsu_binarize(&gray);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(0, 7)[0], 255);
        assert_eq!(binary.as_raw().iter().filter(|&&v| v > 0).count(), 50);
    }

    #[test]
    fn test_binarize_map_is_strict() {
        let map = ProbabilityMap::from_vec(3, 1, vec![0.4, 0.5, 0.6]).unwrap();
        let mask = binarize_map(&map, 0.5);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255]);
    }
}
