//! Iterative sub-pixel corner refinement.
//!
//! For an ideal corner `q`, every image gradient `g` at a pixel `p` near it
//! is orthogonal to `p - q`. Summing `g g^T (p - q) = 0` over a weighted
//! window gives the linear system `G q = b` solved at every iteration.

use image::GrayImage;
use nalgebra::{Matrix2, Point2, Vector2};

/// Refines `corners` in place.
///
/// A corner is left unchanged when the system is singular or when the
/// estimate wanders further than `half_window` from its start.
pub fn corner_sub_pix(
    img: &GrayImage,
    corners: &mut [Point2<f64>],
    half_window: u32,
    max_iterations: usize,
    epsilon: f64,
) {
    for corner in corners.iter_mut() {
        if let Some(refined) = refine_corner(img, *corner, half_window, max_iterations, epsilon) {
            *corner = refined;
        }
    }
}

fn refine_corner(
    img: &GrayImage,
    start: Point2<f64>,
    half_window: u32,
    max_iterations: usize,
    epsilon: f64,
) -> Option<Point2<f64>> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let hw = half_window as i64;
    let sigma2 = (half_window as f64).powi(2);
    let intensity = |x: i64, y: i64| img.get_pixel(x as u32, y as u32)[0] as f64;

    let mut q = start;
    for _ in 0..max_iterations {
        let (cx, cy) = (q.x.round() as i64, q.y.round() as i64);
        let mut g = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();

        for y in (cy - hw).max(1)..=(cy + hw).min(h - 2) {
            for x in (cx - hw).max(1)..=(cx + hw).min(w - 2) {
                let gx = 0.5 * (intensity(x + 1, y) - intensity(x - 1, y));
                let gy = 0.5 * (intensity(x, y + 1) - intensity(x, y - 1));
                let d2 = (x as f64 - q.x).powi(2) + (y as f64 - q.y).powi(2);
                let weight = (-d2 / (2.0 * sigma2)).exp();

                let gg = Matrix2::new(gx * gx, gx * gy, gx * gy, gy * gy) * weight;
                g += gg;
                b += gg * Vector2::new(x as f64, y as f64);
            }
        }

        let next = Point2::from(g.try_inverse()? * b);
        let moved = (next - q).norm();
        q = next;
        if moved < epsilon {
            break;
        }
    }

    let inside = (q - start).norm() <= half_window as f64;
    (inside && q.x.is_finite() && q.y.is_finite()).then_some(q)
}
