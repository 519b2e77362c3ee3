//! Planar-target geometry: the checkerboard object grid, axis-angle
//! rotations, plane homographies and reprojection statistics.

use crate::camera::{CameraModelError, RadTanModel};
use nalgebra::{DMatrix, Matrix3, Point2, Point3, RealField, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of interior corners of a checkerboard.
///
/// Corners are ordered as `rows` rows of `cols` points each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSize {
    pub rows: usize,
    pub cols: usize,
}

impl PatternSize {
    pub fn new(rows: usize, cols: usize) -> Self {
        PatternSize { rows, cols }
    }

    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl fmt::Display for PatternSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Builds the 3D object points of the checkerboard.
///
/// Point `i * cols + j` is `(i * square_size, j * square_size, 0)`, matching
/// the order in which the detector reports image corners.
pub fn object_grid(pattern: PatternSize, square_size: f64) -> Vec<Point3<f64>> {
    let mut object = Vec::with_capacity(pattern.corner_count());
    for i in 0..pattern.rows {
        for j in 0..pattern.cols {
            object.push(Point3::new(i as f64 * square_size, j as f64 * square_size, 0.0));
        }
    }
    object
}

/// Rotates `p` by the axis-angle vector `w` (Rodrigues' formula).
///
/// Generic so it can run on dual numbers inside the optimizer. Small angles
/// fall back to the first-order expansion to keep derivatives finite.
pub fn rotate_axis_angle<T: RealField>(w: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = w.norm_squared();
    let w_cross_p = w.cross(p);
    if theta2 < T::from_f64(1e-16).unwrap() {
        return p + w_cross_p;
    }
    let theta = theta2.sqrt();
    let (sin_t, cos_t) = theta.clone().sin_cos();
    let k = w / theta;
    let k_cross_p = k.cross(p);
    let k_dot_p = k.dot(p);
    p * cos_t.clone() + k_cross_p * sin_t + k * (k_dot_p * (T::one() - cos_t))
}

pub fn axis_angle_to_rotation(rvec: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::new(*rvec)
}

pub fn rotation_to_axis_angle(rotation: &Rotation3<f64>) -> Vector3<f64> {
    rotation.scaled_axis()
}

/// Hartley normalisation: translate the centroid to the origin and scale the
/// mean distance to sqrt(2).
fn normalization_transform(points: &[Point2<f64>]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords)
        / n;
    let mean_dist = points
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(
        scale, 0.0, -scale * centroid.x, //
        0.0, scale, -scale * centroid.y, //
        0.0, 0.0, 1.0,
    )
}

fn apply(h: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    Point2::new(q.x / q.z, q.y / q.z)
}

/// Estimates `H` such that `image ~ H * plane` with the normalised DLT.
pub fn find_homography(plane: &[Point2<f64>], image: &[Point2<f64>]) -> Result<Matrix3<f64>, CameraModelError> {
    let n = plane.len();
    if n < 4 || image.len() != n {
        return Err(CameraModelError::InvalidParams(format!(
            "homography needs at least 4 matching points, got {} and {}",
            n,
            image.len()
        )));
    }

    let t_plane = normalization_transform(plane);
    let t_image = normalization_transform(image);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (pw, pi)) in plane.iter().zip(image.iter()).enumerate() {
        let w = apply(&t_plane, pw);
        let m = apply(&t_image, pi);
        let (x, y, u, v) = (w.x, w.y, m.x, m.y);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // A h = 0: right singular vector of the smallest singular value. Pad to
    // at least 9 rows so the thin SVD keeps the full V.
    let a = if a.nrows() < 9 {
        a.resize_vertically(9, 0.0)
    } else {
        a
    };
    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CameraModelError::NumericalError("SVD failed in homography".to_string()))?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &s)| if s < best.1 { (i, s) } else { best });
    let h = v_t.row(min_idx);

    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_image_inv = t_image
        .try_inverse()
        .ok_or_else(|| CameraModelError::NumericalError("singular normalisation".to_string()))?;
    let mut h_mat = t_image_inv * hn * t_plane;

    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }
    Ok(h_mat)
}

/// Recovers a board pose `(rvec, tvec)` from `H ~ K [r1 r2 t]`.
///
/// The rotation is re-orthonormalised with an SVD and the sign is chosen so
/// that the board lies in front of the camera.
pub fn pose_from_homography(
    k: &Matrix3<f64>,
    h: &Matrix3<f64>,
) -> Result<(Vector3<f64>, Vector3<f64>), CameraModelError> {
    let k_inv = k
        .try_inverse()
        .ok_or_else(|| CameraModelError::NumericalError("camera matrix is singular".to_string()))?;
    let m = k_inv * h;
    let m1 = m.column(0).into_owned();
    let m2 = m.column(1).into_owned();
    let m3 = m.column(2).into_owned();

    let norm = 0.5 * (m1.norm() + m2.norm());
    if norm < f64::EPSILON {
        return Err(CameraModelError::NumericalError(
            "degenerate homography for pose recovery".to_string(),
        ));
    }
    let mut lambda = 1.0 / norm;
    if m3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(CameraModelError::NumericalError(
                "SVD failed in pose recovery".to_string(),
            ))
        }
    };
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut fix = Matrix3::identity();
        fix[(2, 2)] = -1.0;
        rot = u * fix * v_t;
    }

    let rotation = Rotation3::from_matrix_unchecked(rot);
    Ok((rotation_to_axis_angle(&rotation), t))
}

/// Projects board points through a pose and camera model.
pub fn project_view(
    model: &RadTanModel,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    object: &[Point3<f64>],
) -> Result<Vec<Point2<f64>>, CameraModelError> {
    object
        .iter()
        .map(|p| {
            let pc = rotate_axis_angle(rvec, &p.coords) + tvec;
            model.project_unchecked(&pc).map(Point2::from)
        })
        .collect()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Per-point reprojection statistics over all views.
///
/// `rmse` is `sqrt(sum ||observed - projected||^2 / N)`, the calibration
/// quality scalar written to the parameter file.
pub fn compute_reprojection_error(
    model: &RadTanModel,
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    rvecs: &[Vector3<f64>],
    tvecs: &[Vector3<f64>],
) -> Result<ProjectionError, CameraModelError> {
    let mut errors = Vec::new();
    for (view, ((object, image), (rvec, tvec))) in object_points
        .iter()
        .zip(image_points.iter())
        .zip(rvecs.iter().zip(tvecs.iter()))
        .enumerate()
    {
        if object.len() != image.len() {
            return Err(CameraModelError::InvalidParams(format!(
                "view {view}: {} object points but {} image points",
                object.len(),
                image.len()
            )));
        }
        let projected = project_view(model, rvec, tvec, object)?;
        errors.extend(
            projected
                .iter()
                .zip(image.iter())
                .map(|(p, q)| (p - q).norm()),
        );
    }

    if errors.is_empty() {
        return Err(CameraModelError::InvalidParams(
            "no points to compute a reprojection error".to_string(),
        ));
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;
    let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let rmse = (errors.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted = errors.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted.len() % 2 == 0 {
        let mid = sorted.len() / 2;
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    Ok(ProjectionError {
        rmse,
        min,
        max,
        mean,
        stddev: variance.sqrt(),
        median,
    })
}
