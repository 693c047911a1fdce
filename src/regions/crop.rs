use image::{RgbImage, imageops};

use crate::models::{Rect, RegionKind};

/// Pixel window `(x, y, width, height)` for a region crop.
///
/// Grows the bounds by `ratio` of their size on each side; text regions get twice the
/// vertical growth to tolerate baseline drift. Clamped to the frame, `None` when empty.
pub fn crop_window(
    bounds: &Rect,
    kind: RegionKind,
    ratio: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<(u32, u32, u32, u32)> {
    if !bounds.is_finite() {
        return None;
    }
    let dx = bounds.width.abs() * ratio;
    let dy = match kind {
        RegionKind::Text => bounds.height.abs() * ratio * 2.0,
        RegionKind::Barcode => bounds.height.abs() * ratio,
    };

    let x0 = (bounds.x - dx).floor().max(0.0);
    let y0 = (bounds.y - dy).floor().max(0.0);
    let x1 = (bounds.right() + dx).ceil().min(frame_width as f32);
    let y1 = (bounds.bottom() + dy).ceil().min(frame_height as f32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Copy the expanded region out of the frame
pub fn crop_region(frame: &RgbImage, bounds: &Rect, kind: RegionKind, ratio: f32) -> Option<RgbImage> {
    let (x, y, w, h) = crop_window(bounds, kind, ratio, frame.width(), frame.height())?;
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_doubles_vertical_growth() {
        let bounds = Rect::new(100.0, 100.0, 100.0, 50.0);
        assert_eq!(
            crop_window(&bounds, RegionKind::Barcode, 0.1, 640, 480),
            Some((90, 95, 120, 60))
        );
        assert_eq!(
            crop_window(&bounds, RegionKind::Text, 0.1, 640, 480),
            Some((90, 90, 120, 70))
        );
    }

    #[test]
    fn test_clamped_and_empty() {
        let edge = Rect::new(600.0, 450.0, 100.0, 100.0);
        assert_eq!(
            crop_window(&edge, RegionKind::Barcode, 0.1, 640, 480),
            Some((590, 440, 50, 40))
        );
        let outside = Rect::new(700.0, 10.0, 20.0, 20.0);
        assert_eq!(crop_window(&outside, RegionKind::Text, 0.1, 640, 480), None);

        let frame = RgbImage::new(640, 480);
        let crop = crop_region(&frame, &edge, RegionKind::Barcode, 0.1).unwrap();
        assert_eq!(crop.dimensions(), (50, 40));
    }
}
