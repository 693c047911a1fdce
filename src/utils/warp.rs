//! Perspective rectification of a quad into an upright image

use image::RgbImage;
use rayon::prelude::*;

use crate::models::Point;
use crate::utils::homography::Homography;

/// Warp the region bounded by `quad` (`[TL, TR, BR, BL]`, image space) into an
/// `out_width x out_height` image. Pixels that fall outside the source are black.
pub fn warp_perspective(
    image: &RgbImage,
    quad: &[Point; 4],
    out_width: u32,
    out_height: u32,
) -> Option<RgbImage> {
    if out_width == 0 || out_height == 0 || image.width() == 0 || image.height() == 0 {
        return None;
    }

    let w = out_width as f32;
    let h = out_height as f32;
    let target = [
        Point::new(0.0, 0.0),
        Point::new(w - 1.0, 0.0),
        Point::new(w - 1.0, h - 1.0),
        Point::new(0.0, h - 1.0),
    ];
    // Output -> source, so every output pixel is sampled exactly once
    let back = Homography::from_quad_points(&target, quad)?;

    let src_w = image.width() as usize;
    let src_h = image.height() as usize;
    let src = image.as_raw();
    let row_len = out_width as usize * 3;
    let mut out = vec![0u8; row_len * out_height as usize];

    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for x in 0..out_width as usize {
            let [sx, sy] = back.project(x as f64, y as f64);
            if let Some(px) = sample_bilinear(src, src_w, src_h, sx, sy) {
                row[x * 3..x * 3 + 3].copy_from_slice(&px);
            }
        }
    });

    RgbImage::from_raw(out_width, out_height, out)
}

fn sample_bilinear(src: &[u8], width: usize, height: usize, x: f64, y: f64) -> Option<[u8; 3]> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let at = |xx: usize, yy: usize, c: usize| src[(yy * width + xx) * 3 + c] as f64;
    let mut px = [0u8; 3];
    for (c, out) in px.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - fx) + at(x1, y0, c) * fx;
        let bottom = at(x0, y1, c) * (1.0 - fx) + at(x1, y1, c) * fx;
        *out = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(px)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_warp_axis_aligned_crop() {
        let mut img = RgbImage::new(40, 40);
        for y in 10..30 {
            for x in 10..30 {
                img.put_pixel(x, y, Rgb([200, 100, 50]));
            }
        }
        let quad = [
            Point::new(10.0, 10.0),
            Point::new(29.0, 10.0),
            Point::new(29.0, 29.0),
            Point::new(10.0, 29.0),
        ];
        let out = warp_perspective(&img, &quad, 20, 20).unwrap();
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.get_pixel(0, 0), &Rgb([200, 100, 50]));
        assert_eq!(out.get_pixel(19, 19), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_warp_rejects_empty_output() {
        let img = RgbImage::new(4, 4);
        let quad = [Point::new(0.0, 0.0); 4];
        assert!(warp_perspective(&img, &quad, 0, 10).is_none());
    }
}
