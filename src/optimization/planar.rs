//! Calibration of a [`RadTanModel`] from views of a planar target.
//!
//! The closed-form step fits one homography per view, solves the focal
//! lengths with the principal point held at the image centre, and recovers
//! each board pose from `K^-1 H`. The non-linear step jointly refines the
//! shared intrinsic block `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` and one
//! axis-angle + translation block per view with `tiny_solver`'s
//! Levenberg-Marquardt, differentiating [`PlanarViewCost`] automatically.

use crate::camera::rad_tan::distort;
use crate::camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
use crate::geometry::{
    compute_reprojection_error, find_homography, pose_from_homography, rotate_axis_angle,
    ProjectionError,
};
use crate::optimization::Optimizer;

use log::{debug, info};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

const INTRINSICS_KEY: &str = "intrinsics";

fn pose_key(view: usize) -> String {
    format!("pose_{view}")
}

/// Which parameters stay at their initial value during refinement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Keep `cx, cy` at the image centre.
    pub fix_principal_point: bool,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    /// Keep `p1, p2` at zero.
    pub zero_tangent_dist: bool,
}

/// Output of a planar calibration.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// Root-mean-square reprojection error over all corners, in pixels.
    pub rms: f64,
    pub camera: RadTanModel,
    /// Per-view board rotation (axis-angle).
    pub rvecs: Vec<Vector3<f64>>,
    /// Per-view board translation, in object units.
    pub tvecs: Vec<Vector3<f64>>,
}

impl CalibrationResult {
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.camera.intrinsics.to_matrix()
    }
}

/// Projects an object point through `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`
/// and an `[rx, ry, rz, tx, ty, tz]` pose.
fn project_generic<T: RealField>(cam: &DVector<T>, pose: &DVector<T>, point: &Vector3<f64>) -> Vector2<T> {
    let rvec = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
    let tvec = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());
    let pw = Vector3::new(
        T::from_f64(point.x).unwrap(),
        T::from_f64(point.y).unwrap(),
        T::from_f64(point.z).unwrap(),
    );
    let pc = rotate_axis_angle(&rvec, &pw) + tvec;

    let x = pc.x.clone() / pc.z.clone();
    let y = pc.y.clone() / pc.z.clone();
    let d = [
        cam[4].clone(),
        cam[5].clone(),
        cam[6].clone(),
        cam[7].clone(),
        cam[8].clone(),
    ];
    let (xd, yd) = distort(x, y, &d);

    Vector2::new(
        cam[0].clone() * xd + cam[2].clone(),
        cam[1].clone() * yd + cam[3].clone(),
    )
}

/// Reprojection residuals of all corners of one view.
///
/// Parameter blocks: `[intrinsics (9), pose (6)]`.
#[derive(Debug, Clone)]
struct PlanarViewCost {
    object: Vec<Vector3<f64>>,
    image: Vec<Vector2<f64>>,
}

impl PlanarViewCost {
    fn new(object: &[Point3<f64>], image: &[Point2<f64>]) -> Self {
        Self {
            object: object.iter().map(|p| p.coords).collect(),
            image: image.iter().map(|p| p.coords).collect(),
        }
    }
}

impl<T: RealField> Factor<T> for PlanarViewCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let cam = &params[0];
        let pose = &params[1];

        let mut residuals = DVector::zeros(self.image.len() * 2);
        for (i, (pw, uv)) in self.object.iter().zip(self.image.iter()).enumerate() {
            let projected = project_generic(cam, pose, pw);
            residuals[i * 2] = projected.x.clone() - T::from_f64(uv.x).unwrap();
            residuals[i * 2 + 1] = projected.y.clone() - T::from_f64(uv.y).unwrap();
        }
        residuals
    }
}

/// Cost structure for planar-target calibration.
///
/// Holds the accepted views (object grid and detected corners, index-aligned),
/// the camera model being refined and the current per-view poses.
#[derive(Clone)]
pub struct PlanarCalibrationCost {
    model: RadTanModel,
    object_points: Vec<Vec<Point3<f64>>>,
    image_points: Vec<Vec<Point2<f64>>>,
    rvecs: Vec<Vector3<f64>>,
    tvecs: Vec<Vector3<f64>>,
    flags: CalibrationFlags,
}

impl PlanarCalibrationCost {
    /// Creates the cost from parallel per-view correspondences.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::InvalidParams`] if there are no views, the two
    /// lists differ in length, a view has fewer than 4 points or its object
    /// and image point counts differ.
    pub fn new(
        object_points: Vec<Vec<Point3<f64>>>,
        image_points: Vec<Vec<Point2<f64>>>,
        resolution: Resolution,
        flags: CalibrationFlags,
    ) -> Result<Self, CameraModelError> {
        if object_points.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Need at least one view for calibration".to_string(),
            ));
        }
        if object_points.len() != image_points.len() {
            return Err(CameraModelError::InvalidParams(format!(
                "Number of object point sets ({}) and image point sets ({}) must match",
                object_points.len(),
                image_points.len()
            )));
        }
        for (view, (object, image)) in object_points.iter().zip(image_points.iter()).enumerate() {
            if object.len() != image.len() {
                return Err(CameraModelError::InvalidParams(format!(
                    "View {view}: number of 2D and 3D points must match"
                )));
            }
            if object.len() < 4 {
                return Err(CameraModelError::InvalidParams(format!(
                    "View {view}: need at least 4 points, got {}",
                    object.len()
                )));
            }
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::InvalidParams(
                "Image size must be non-zero".to_string(),
            ));
        }

        let focal = resolution.width.max(resolution.height) as f64;
        let model = RadTanModel::from_intrinsics(
            Intrinsics {
                fx: focal,
                fy: focal,
                cx: (resolution.width as f64 - 1.0) * 0.5,
                cy: (resolution.height as f64 - 1.0) * 0.5,
            },
            resolution,
        );
        let n_views = object_points.len();

        Ok(PlanarCalibrationCost {
            model,
            object_points,
            image_points,
            rvecs: vec![Vector3::zeros(); n_views],
            tvecs: vec![Vector3::new(0.0, 0.0, 1.0); n_views],
            flags,
        })
    }

    pub fn model(&self) -> &RadTanModel {
        &self.model
    }

    pub fn num_views(&self) -> usize {
        self.object_points.len()
    }

    pub fn reprojection_error(&self) -> Result<ProjectionError, CameraModelError> {
        compute_reprojection_error(
            &self.model,
            &self.object_points,
            &self.image_points,
            &self.rvecs,
            &self.tvecs,
        )
    }

    pub fn into_result(self) -> Result<CalibrationResult, CameraModelError> {
        let rms = self.reprojection_error()?.rmse;
        Ok(CalibrationResult {
            rms,
            camera: self.model,
            rvecs: self.rvecs,
            tvecs: self.tvecs,
        })
    }

    fn homographies(&self) -> Result<Vec<Matrix3<f64>>, CameraModelError> {
        self.object_points
            .iter()
            .zip(self.image_points.iter())
            .map(|(object, image)| {
                let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
                find_homography(&plane, image)
            })
            .collect()
    }

    /// Focal lengths from the homographies with a known principal point.
    ///
    /// With `B = diag(1/fx^2, 1/fy^2, 1)` every view gives
    /// `h1' B h2 = 0` and `h1' B h1 = h2' B h2`, linear in the two unknowns.
    fn estimate_focal_lengths(&self, homographies: &[Matrix3<f64>]) -> Option<(f64, f64)> {
        let cx = self.model.intrinsics.cx;
        let cy = self.model.intrinsics.cy;
        let center_inv = Matrix3::new(
            1.0, 0.0, -cx, //
            0.0, 1.0, -cy, //
            0.0, 0.0, 1.0,
        );

        let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
        let mut b = DVector::<f64>::zeros(2 * homographies.len());
        for (k, h) in homographies.iter().enumerate() {
            let hc = center_inv * h;
            let norm = hc.norm();
            if norm < f64::EPSILON {
                return None;
            }
            let hc = hc / norm;
            let h1 = hc.column(0);
            let h2 = hc.column(1);

            a[(2 * k, 0)] = h1.x * h2.x;
            a[(2 * k, 1)] = h1.y * h2.y;
            b[2 * k] = -h1.z * h2.z;

            a[(2 * k + 1, 0)] = h1.x * h1.x - h2.x * h2.x;
            a[(2 * k + 1, 1)] = h1.y * h1.y - h2.y * h2.y;
            b[2 * k + 1] = -(h1.z * h1.z - h2.z * h2.z);
        }

        let svd = a.svd(true, true);
        let solution = svd.solve(&b, 1e-12).ok()?;
        let (inv_fx2, inv_fy2) = (solution[0], solution[1]);
        if inv_fx2 <= 0.0 || inv_fy2 <= 0.0 {
            return None;
        }
        let fx = 1.0 / inv_fx2.sqrt();
        let fy = 1.0 / inv_fy2.sqrt();
        let ratio = fx / fy;
        if !fx.is_finite() || !fy.is_finite() || !(0.5..=2.0).contains(&ratio) {
            return None;
        }
        Some((fx, fy))
    }
}

impl Optimizer for PlanarCalibrationCost {
    /// Jointly refines intrinsics, distortion and all view poses.
    ///
    /// Parameters held by [`CalibrationFlags`] are fixed in the problem.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError> {
        let mut initial_params = self.model.to_params();
        if self.flags.zero_tangent_dist {
            initial_params[6] = 0.0;
            initial_params[7] = 0.0;
        }
        if self.flags.fix_k3 {
            initial_params[8] = 0.0;
        }

        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();
        initial_values.insert(INTRINSICS_KEY.to_string(), initial_params);

        for (view, (object, image)) in self
            .object_points
            .iter()
            .zip(self.image_points.iter())
            .enumerate()
        {
            let key = pose_key(view);
            let r = &self.rvecs[view];
            let t = &self.tvecs[view];
            initial_values.insert(
                key.clone(),
                DVector::from_vec(vec![r.x, r.y, r.z, t.x, t.y, t.z]),
            );

            let cost_function = PlanarViewCost::new(object, image);
            let num_residuals = image.len() * 2;
            problem.add_residual_block(
                num_residuals,
                &[INTRINSICS_KEY, key.as_str()],
                Box::new(cost_function),
                None,
            );
        }

        if self.flags.fix_principal_point {
            problem.fix_variable(INTRINSICS_KEY, 2);
            problem.fix_variable(INTRINSICS_KEY, 3);
        }
        if self.flags.zero_tangent_dist {
            problem.fix_variable(INTRINSICS_KEY, 6);
            problem.fix_variable(INTRINSICS_KEY, 7);
        }
        if self.flags.fix_k3 {
            problem.fix_variable(INTRINSICS_KEY, 8);
        }

        if verbose {
            info!(
                "Starting Levenberg-Marquardt over {} views ({} corners)...",
                self.num_views(),
                self.image_points.iter().map(Vec::len).sum::<usize>()
            );
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, None)
            .ok_or_else(|| CameraModelError::NumericalError("Optimization failed".to_string()))?;

        if verbose {
            info!("Optimization finished");
        }

        let params = result.get(INTRINSICS_KEY).ok_or_else(|| {
            CameraModelError::NumericalError("intrinsics missing from solution".to_string())
        })?;
        let refined = RadTanModel {
            intrinsics: Intrinsics {
                fx: params[0],
                fy: params[1],
                cx: params[2],
                cy: params[3],
            },
            resolution: self.model.resolution,
            distortions: [params[4], params[5], params[6], params[7], params[8]],
        };
        refined.validate_params()?;

        for view in 0..self.num_views() {
            let pose = result.get(&pose_key(view)).ok_or_else(|| {
                CameraModelError::NumericalError(format!("pose {view} missing from solution"))
            })?;
            self.rvecs[view] = Vector3::new(pose[0], pose[1], pose[2]);
            self.tvecs[view] = Vector3::new(pose[3], pose[4], pose[5]);
        }
        self.model = refined;

        Ok(())
    }

    /// Closed-form initialisation of the focal lengths and view poses.
    ///
    /// The principal point is the image centre and distortion is zero. When
    /// the homographies cannot constrain the focal lengths (for example a
    /// single fronto-parallel view) the larger image side is used instead.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized,
    {
        let homographies = self.homographies()?;

        match self.estimate_focal_lengths(&homographies) {
            Some((fx, fy)) => {
                self.model.intrinsics.fx = fx;
                self.model.intrinsics.fy = fy;
            }
            None => {
                let focal = self.model.resolution.width.max(self.model.resolution.height) as f64;
                debug!("Degenerate views for focal length estimation, using {focal}");
                self.model.intrinsics.fx = focal;
                self.model.intrinsics.fy = focal;
            }
        }
        self.model.distortions = [0.0; 5];

        let k = self.model.intrinsics.to_matrix();
        for (view, h) in homographies.iter().enumerate() {
            let (rvec, tvec) = pose_from_homography(&k, h)?;
            self.rvecs[view] = rvec;
            self.tvecs[view] = tvec;
        }

        self.model.validate_params()?;
        Ok(())
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.model.intrinsics.clone()
    }

    fn get_resolution(&self) -> Resolution {
        self.model.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.model.get_distortion()
    }
}

/// Calibrates a camera from planar-target correspondences.
///
/// `object_points[v]` and `image_points[v]` are the board grid and the
/// detected corners of view `v`; `resolution` is the reference image size.
pub fn calibrate_camera(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    resolution: Resolution,
    flags: &CalibrationFlags,
    verbose: bool,
) -> Result<CalibrationResult, CameraModelError> {
    let mut cost = PlanarCalibrationCost::new(
        object_points.to_vec(),
        image_points.to_vec(),
        resolution,
        flags.clone(),
    )?;

    cost.linear_estimation()?;
    debug!(
        "Initial estimate {:?}, {:?}",
        cost.model(),
        cost.reprojection_error()?
    );

    cost.optimize(verbose)?;
    let result = cost.into_result()?;
    debug!("Refined estimate {:?}, rms {}", result.camera, result.rms);
    Ok(result)
}
