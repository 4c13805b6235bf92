//! Camera overlay placement

use super::types::{CameraPosition, CameraSize, Rect};

/// Distance between the overlay and the canvas edge, in pixels
pub const OVERLAY_MARGIN: u32 = 20;

/// Aspect ratio assumed before the camera delivers its first frame
const FALLBACK_ASPECT: (u32, u32) = (16, 9);

/// Compute the overlay rectangle for a camera frame of `source` dimensions
/// on a `canvas` of the given dimensions.
///
/// The width is the size tier's fraction of the canvas width and the height
/// follows the source aspect ratio. The result always lies inside the canvas.
pub fn overlay_rect(
    position: CameraPosition,
    size: CameraSize,
    canvas: (u32, u32),
    source: Option<(u32, u32)>,
) -> Rect {
    let (canvas_w, canvas_h) = canvas;
    let (src_w, src_h) = match source {
        Some((w, h)) if w > 0 && h > 0 => (w, h),
        _ => FALLBACK_ASPECT,
    };
    let aspect = src_h as f64 / src_w as f64;

    let margin = if canvas_w > OVERLAY_MARGIN * 4 && canvas_h > OVERLAY_MARGIN * 4 {
        OVERLAY_MARGIN
    } else {
        0
    };
    let max_w = canvas_w.saturating_sub(margin * 2).max(1);
    let max_h = canvas_h.saturating_sub(margin * 2).max(1);

    let mut width = ((canvas_w as f64 * size.width_fraction()).round() as u32).clamp(1, max_w);
    let mut height = ((width as f64 * aspect).round() as u32).max(1);

    // Tall sources on wide canvases: fit by height instead
    if height > max_h {
        height = max_h;
        width = ((height as f64 / aspect).round() as u32).clamp(1, max_w);
    }

    let left = margin;
    let top = margin;
    let right = canvas_w.saturating_sub(width + margin);
    let bottom = canvas_h.saturating_sub(height + margin);

    let (x, y) = match position {
        CameraPosition::TopLeft => (left, top),
        CameraPosition::TopRight => (right, top),
        CameraPosition::BottomLeft => (left, bottom),
        CameraPosition::BottomRight => (right, bottom),
    };

    Rect {
        x,
        y,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_bottom_right_stays_inside() {
        let rect = overlay_rect(
            CameraPosition::BottomRight,
            CameraSize::Large,
            (1920, 1080),
            Some((1280, 720)),
        );
        assert!(rect.right() <= 1920);
        assert!(rect.bottom() <= 1080);
        let share = rect.width as f64 / 1920.0;
        assert!((share - 0.40).abs() <= 0.02, "width share {share}");
        assert_eq!(rect.height, 432);
        assert_eq!(rect.x, 1920 - 768 - OVERLAY_MARGIN);
    }

    #[test]
    fn test_small_top_left_uses_margin() {
        let rect = overlay_rect(
            CameraPosition::TopLeft,
            CameraSize::Small,
            (1920, 1080),
            Some((640, 480)),
        );
        assert_eq!((rect.x, rect.y), (OVERLAY_MARGIN, OVERLAY_MARGIN));
        assert_eq!(rect.width, 384);
        assert_eq!(rect.height, 288);
    }

    #[test]
    fn test_tiers_grow() {
        let widths: Vec<u32> = [CameraSize::Small, CameraSize::Medium, CameraSize::Large]
            .iter()
            .map(|size| overlay_rect(CameraPosition::TopRight, *size, (1000, 1000), None).width)
            .collect();
        assert_eq!(widths, vec![200, 300, 400]);
    }

    #[test]
    fn test_portrait_camera_is_clamped_by_height() {
        let rect = overlay_rect(
            CameraPosition::BottomLeft,
            CameraSize::Large,
            (1920, 400),
            Some((720, 1280)),
        );
        assert!(rect.bottom() <= 400);
        assert!(rect.right() <= 1920);
        assert_eq!(rect.height, 400 - OVERLAY_MARGIN * 2);
    }

    #[test]
    fn test_tiny_canvas_drops_margin() {
        let rect = overlay_rect(CameraPosition::BottomRight, CameraSize::Large, (40, 30), None);
        assert!(rect.right() <= 40);
        assert!(rect.bottom() <= 30);
    }
}
