//! The `optimization` module refines camera parameters against observed
//! checkerboard corners.
//!
//! The [`Optimizer`] trait is the common interface: a closed-form
//! [`Optimizer::linear_estimation`] produces the starting point and
//! [`Optimizer::optimize`] runs Levenberg-Marquardt (via `tiny_solver`) on the
//! reprojection error. [`planar::calibrate_camera`] chains both for a set of
//! planar-target views.

pub mod planar;

pub use planar::{calibrate_camera, CalibrationFlags, CalibrationResult, PlanarCalibrationCost};

use crate::camera::{CameraModelError, Intrinsics, Resolution};

/// A trait for camera model optimization tasks.
///
/// Types implementing `Optimizer` own their observations and a camera model
/// whose parameters they refine in place.
pub trait Optimizer {
    /// Performs non-linear optimization to refine the camera model parameters.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, progress is logged at `info` level.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError>;

    /// Computes a closed-form initial guess for the parameters.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_resolution(&self) -> Resolution;

    /// The distortion coefficients of the underlying model.
    fn get_distortion(&self) -> Vec<f64>;
}
