//! Synthetic checkerboard images seen through a known camera.
//!
//! Every pixel is traced back through [`RadTanModel::undistort_normalized`]
//! onto the board plane and shaded by square parity, with 2x2 supersampling.
//! The board has `(rows + 1) x (cols + 1)` squares whose interior corners are
//! the points of [`object_grid`], surrounded by one square of white paper.

use crate::camera::{CameraModelError, RadTanModel};
use crate::geometry::{axis_angle_to_rotation, object_grid, project_view, PatternSize};
use image::{Rgb, RgbImage};
use nalgebra::{Point2, Vector2, Vector3};

const DARK: f64 = 30.0;
const LIGHT: f64 = 225.0;
const BACKGROUND: f64 = 110.0;
const SUPERSAMPLE_OFFSETS: [f64; 2] = [-0.25, 0.25];

/// Board pose: object points map to `R(rvec) * p + tvec` in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardView {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl BoardView {
    pub fn new(rvec: [f64; 3], tvec: [f64; 3]) -> Self {
        BoardView {
            rvec: Vector3::from(rvec),
            tvec: Vector3::from(tvec),
        }
    }
}

/// Tilted poses that keep an 8x6 board with 23 mm squares inside a 640x480
/// image at a focal length around 600 px.
pub fn default_board_views() -> Vec<BoardView> {
    vec![
        BoardView::new([0.25, -0.15, 0.05], [-80.0, -60.0, 460.0]),
        BoardView::new([-0.2, 0.3, -0.1], [-70.0, -55.0, 500.0]),
        BoardView::new([0.1, 0.35, 0.2], [-90.0, -50.0, 520.0]),
        BoardView::new([-0.3, -0.2, 0.0], [-75.0, -65.0, 480.0]),
    ]
}

/// Ground-truth image positions of the interior corners.
pub fn board_corners(
    model: &RadTanModel,
    pattern: PatternSize,
    square_size: f64,
    view: &BoardView,
) -> Result<Vec<Point2<f64>>, CameraModelError> {
    project_view(model, &view.rvec, &view.tvec, &object_grid(pattern, square_size))
}

/// Renders the board at `view` into an image of the model's resolution.
pub fn render_checkerboard(
    model: &RadTanModel,
    pattern: PatternSize,
    square_size: f64,
    view: &BoardView,
) -> Result<RgbImage, CameraModelError> {
    if square_size <= 0.0 {
        return Err(CameraModelError::InvalidParams(
            "square size must be positive".to_string(),
        ));
    }
    let (width, height) = (model.resolution.width, model.resolution.height);

    // Board frame: p_board = R^T (p_cam - t).
    let r_inv = axis_angle_to_rotation(&view.rvec).inverse();
    let origin = r_inv * -view.tvec;

    let mut img = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for dy in SUPERSAMPLE_OFFSETS {
                for dx in SUPERSAMPLE_OFFSETS {
                    let m = model.undistort_normalized(&Vector2::new(x as f64 + dx, y as f64 + dy))?;
                    let dir = r_inv * Vector3::new(m.x, m.y, 1.0);
                    sum += shade(&origin, &dir, pattern, square_size);
                }
            }
            let v = (sum / 4.0).round().clamp(0.0, 255.0) as u8;
            img.put_pixel(x, y, Rgb([v, v, v]));
        }
    }
    Ok(img)
}

/// Intensity where the ray `origin + s * dir` (board frame) meets `z = 0`.
fn shade(origin: &Vector3<f64>, dir: &Vector3<f64>, pattern: PatternSize, square: f64) -> f64 {
    if dir.z.abs() < f64::EPSILON {
        return BACKGROUND;
    }
    let s = -origin.z / dir.z;
    if s <= 0.0 {
        return BACKGROUND;
    }
    let (bx, by) = (origin.x + s * dir.x, origin.y + s * dir.y);
    let (cx, cy) = ((bx / square).floor(), (by / square).floor());

    let rows = pattern.rows as f64;
    let cols = pattern.cols as f64;
    let on_squares = (-1.0..rows).contains(&cx) && (-1.0..cols).contains(&cy);
    if on_squares {
        return if (cx + cy).rem_euclid(2.0) == 0.0 { DARK } else { LIGHT };
    }
    let on_paper = (-2.0..rows + 1.0).contains(&cx) && (-2.0..cols + 1.0).contains(&cy);
    if on_paper {
        LIGHT
    } else {
        BACKGROUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, Resolution};

    fn small_camera() -> RadTanModel {
        RadTanModel::from_intrinsics(
            Intrinsics {
                fx: 300.0,
                fy: 300.0,
                cx: 159.5,
                cy: 119.5,
            },
            Resolution {
                width: 320,
                height: 240,
            },
        )
    }

    #[test]
    fn test_render_fronto_parallel_board() {
        let camera = small_camera();
        let pattern = PatternSize::new(4, 3);
        let view = BoardView::new([0.0, 0.0, 0.0], [-30.0, -20.0, 300.0]);
        let img = render_checkerboard(&camera, pattern, 20.0, &view).unwrap();
        assert_eq!(img.dimensions(), (320, 240));

        // Centre of square (0, 0) is dark, square (1, 0) light.
        let dark = camera.project_unchecked(&Vector3::new(10.0 - 30.0, 10.0 - 20.0, 300.0)).unwrap();
        let light = camera.project_unchecked(&Vector3::new(30.0 - 30.0, 10.0 - 20.0, 300.0)).unwrap();
        assert_eq!(img.get_pixel(dark.x.round() as u32, dark.y.round() as u32)[0], DARK as u8);
        assert_eq!(img.get_pixel(light.x.round() as u32, light.y.round() as u32)[0], LIGHT as u8);
        assert_eq!(img.get_pixel(2, 2)[0], BACKGROUND as u8);
    }

    #[test]
    fn test_board_corners_are_inside_default_views() {
        let camera = RadTanModel::from_intrinsics(
            Intrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: 319.5,
                cy: 239.5,
            },
            Resolution {
                width: 640,
                height: 480,
            },
        );
        for view in default_board_views() {
            let corners = board_corners(&camera, PatternSize::new(8, 6), 23.0, &view).unwrap();
            assert_eq!(corners.len(), 48);
            assert!(corners
                .iter()
                .all(|c| c.x > 20.0 && c.x < 620.0 && c.y > 20.0 && c.y < 460.0));
        }
    }

    #[test]
    fn test_render_rejects_bad_square_size() {
        let view = BoardView::new([0.0, 0.0, 0.0], [0.0, 0.0, 100.0]);
        assert!(render_checkerboard(&small_camera(), PatternSize::new(4, 3), 0.0, &view).is_err());
    }
}
