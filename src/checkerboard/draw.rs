//! Corner overlay drawing.

use crate::geometry::PatternSize;
use image::{Rgb, RgbImage};
use nalgebra::Point2;

/// Per-row colours of a found board, cycling for taller patterns.
const ROW_COLORS: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 200]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

const NOT_FOUND_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const MARKER_RADIUS: i32 = 4;

/// Draws detected corners onto `img`.
///
/// A found board gets one colour per row with the corners joined in scan
/// order; otherwise every corner is marked with a red circle.
pub fn draw_chessboard_corners(
    img: &mut RgbImage,
    pattern: PatternSize,
    corners: &[Point2<f64>],
    found: bool,
) {
    if !found || corners.len() != pattern.corner_count() || pattern.cols == 0 {
        for corner in corners {
            draw_circle(img, corner, MARKER_RADIUS, NOT_FOUND_COLOR);
        }
        return;
    }

    let mut previous: Option<&Point2<f64>> = None;
    for (row, row_corners) in corners.chunks(pattern.cols).enumerate() {
        let color = ROW_COLORS[row % ROW_COLORS.len()];
        for corner in row_corners {
            if let Some(prev) = previous {
                draw_line(img, prev, corner, color);
            }
            draw_circle(img, corner, MARKER_RADIUS, color);
            previous = Some(corner);
        }
    }
}

fn put_pixel_checked(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Circle outline.
fn draw_circle(img: &mut RgbImage, center: &Point2<f64>, radius: i32, color: Rgb<u8>) {
    let center_x = center.x.round() as i32;
    let center_y = center.y.round() as i32;
    let outer = radius * radius;
    let inner = (radius - 1) * (radius - 1);

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = dx * dx + dy * dy;
            if d2 <= outer && d2 > inner {
                put_pixel_checked(img, center_x + dx, center_y + dy, color);
            }
        }
    }
}

/// Bresenham line between two points.
fn draw_line(img: &mut RgbImage, from: &Point2<f64>, to: &Point2<f64>, color: Rgb<u8>) {
    let (mut x0, mut y0) = (from.x.round() as i32, from.y.round() as i32);
    let (x1, y1) = (to.x.round() as i32, to.y.round() as i32);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_pixel_checked(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_board_uses_row_colors() {
        let pattern = PatternSize::new(2, 3);
        let corners: Vec<_> = (0..2)
            .flat_map(|r| (0..3).map(move |c| Point2::new(10.0 + 20.0 * c as f64, 10.0 + 20.0 * r as f64)))
            .collect();
        let mut img = RgbImage::new(80, 60);
        draw_chessboard_corners(&mut img, pattern, &corners, true);

        // Circle outlines at radius 4 and the line between the two rows.
        assert_eq!(*img.get_pixel(14, 10), ROW_COLORS[0]);
        assert_eq!(*img.get_pixel(14, 30), ROW_COLORS[1]);
        assert_eq!(*img.get_pixel(20, 10), ROW_COLORS[0]);
    }

    #[test]
    fn test_not_found_draws_red_markers_only() {
        let pattern = PatternSize::new(8, 6);
        let corners = vec![Point2::new(20.0, 20.0), Point2::new(40.0, 20.0)];
        let mut img = RgbImage::new(64, 48);
        draw_chessboard_corners(&mut img, pattern, &corners, false);

        assert_eq!(*img.get_pixel(24, 20), NOT_FOUND_COLOR);
        assert_eq!(*img.get_pixel(44, 20), NOT_FOUND_COLOR);
        // No connecting line.
        assert_eq!(*img.get_pixel(30, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_markers_near_border_are_clipped() {
        let pattern = PatternSize::new(1, 1);
        let mut img = RgbImage::new(8, 8);
        draw_chessboard_corners(&mut img, pattern, &[Point2::new(0.0, 0.0)], true);
        assert_eq!(*img.get_pixel(4, 0), ROW_COLORS[0]);
    }
}
