//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This is the pinhole model with the five-coefficient lens distortion
//! `[k1, k2, p1, p2, k3]` that checkerboard calibration estimates. The same
//! distortion function is used, in generic form, by the optimizer residuals
//! (see [`distort`]).

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io::Write, path::Path};
use yaml_rust::YamlLoader;

/// Applies radial and tangential distortion to a normalized image point.
///
/// `d` holds `[k1, k2, p1, p2, k3]`. Generic over [`RealField`] so that the
/// optimizer can differentiate through it.
pub fn distort<T: RealField>(x: T, y: T, d: &[T; 5]) -> (T, T) {
    let two = T::one() + T::one();
    let [k1, k2, p1, p2, k3] = d.clone();

    let xy = x.clone() * y.clone();
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();
    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

    let xd = x.clone() * radial.clone()
        + two.clone() * p1.clone() * xy.clone()
        + p2.clone() * (r2.clone() + two.clone() * x.clone() * x);
    let yd = y.clone() * radial
        + p1 * (r2 + two.clone() * y.clone() * y)
        + two * p2 * xy;
    (xd, yd)
}

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{DVector, Vector3};
/// use chessboard_calib::camera::{CameraModel, RadTanModel, Resolution};
///
/// let params = DVector::from_vec(vec![
///     500.0, 500.0, 320.0, 240.0, // fx, fy, cx, cy
///     0.0, 0.0, 0.0, 0.0, 0.0,    // k1, k2, p1, p2, k3
/// ]);
/// let mut model = RadTanModel::new(&params).unwrap();
/// model.resolution = Resolution { width: 640, height: 480 };
///
/// let uv = model.project(&Vector3::new(0.1, 0.2, 1.0)).unwrap();
/// assert!((uv.x - 370.0).abs() < 1e-9);
/// assert!((uv.y - 340.0).abs() < 1e-9);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// The 5 distortion coefficients: `[k1, k2, p1, p2, k3]`.
    pub distortions: [f64; 5],
}

impl RadTanModel {
    /// Creates a model from `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    ///
    /// The resolution is initialized to 0x0, which disables the image bounds
    /// check in [`CameraModel::project`].
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() != 9 {
            return Err(CameraModelError::InvalidParams(format!(
                "RadTan model requires 9 parameters, got {}",
                parameters.len()
            )));
        }
        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortions: [
                parameters[4], // k1
                parameters[5], // k2
                parameters[6], // p1
                parameters[7], // p2
                parameters[8], // k3
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Pinhole model without distortion.
    pub fn from_intrinsics(intrinsics: Intrinsics, resolution: Resolution) -> Self {
        RadTanModel {
            intrinsics,
            resolution,
            distortions: [0.0; 5],
        }
    }

    /// Parameters in optimizer order `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    pub fn to_params(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions[0],
            self.distortions[1],
            self.distortions[2],
            self.distortions[3],
            self.distortions[4],
        ])
    }

    /// Projects a point without the image bounds check.
    pub fn project_unchecked(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let (xd, yd) = distort(point_3d.x / point_3d.z, point_3d.y / point_3d.z, &self.distortions);
        Ok(Vector2::new(
            self.intrinsics.fx * xd + self.intrinsics.cx,
            self.intrinsics.fy * yd + self.intrinsics.cy,
        ))
    }

    /// Removes lens distortion from a pixel, returning normalized coordinates.
    ///
    /// Fixed-point iteration on the distortion equation; converges for the
    /// moderate distortion a checkerboard calibration produces.
    pub fn undistort_normalized(&self, point_2d: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        const MAX_ITERATIONS: usize = 50;
        const EPS: f64 = 1e-12;

        let [k1, k2, p1, p2, k3] = self.distortions;
        let xd = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let yd = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let (mut x, mut y) = (xd, yd);
        for _ in 0..MAX_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            if radial.abs() < f64::EPSILON {
                return Err(CameraModelError::NumericalError(
                    "radial distortion factor vanished during undistortion".to_string(),
                ));
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let nx = (xd - dx) / radial;
            let ny = (yd - dy) / radial;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < EPS {
                break;
            }
        }

        if !x.is_finite() || !y.is_finite() {
            return Err(CameraModelError::NumericalError(
                "undistortion diverged".to_string(),
            ));
        }
        Ok(Vector2::new(x, y))
    }

    fn is_inside(&self, u: f64, v: f64) -> bool {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return true;
        }
        u >= 0.0 && u < self.resolution.width as f64 && v >= 0.0 && v < self.resolution.height as f64
    }

    /// Loads a model from a YAML file with a `cam0` node holding
    /// `intrinsics: [fx, fy, cx, cy]`, `distortion: [k1, k2, p1, p2, k3]`
    /// and `resolution: [width, height]`.
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::YamlError("empty YAML document".to_string()))?;
        let cam = &doc["cam0"];

        let floats = |key: &str, len: usize| -> Result<Vec<f64>, CameraModelError> {
            let values = cam[key].as_vec().ok_or_else(|| {
                CameraModelError::InvalidParams(format!("YAML missing '{key}' or not an array"))
            })?;
            if values.len() != len {
                return Err(CameraModelError::InvalidParams(format!(
                    "'{key}' must have {len} entries, got {}",
                    values.len()
                )));
            }
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .or_else(|| v.as_i64().map(|i| i as f64))
                        .ok_or_else(|| {
                            CameraModelError::InvalidParams(format!("Invalid '{key}' entry: not a number"))
                        })
                })
                .collect()
        };

        let intrinsics = floats("intrinsics", 4)?;
        let distortion = floats("distortion", 5)?;
        let resolution = floats("resolution", 2)?;
        let dimension = |value: f64| -> Result<u32, CameraModelError> {
            if value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
                return Err(CameraModelError::InvalidParams(format!(
                    "Invalid 'resolution' entry: {value} is not a pixel count"
                )));
            }
            Ok(value as u32)
        };

        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: intrinsics[0],
                fy: intrinsics[1],
                cx: intrinsics[2],
                cy: intrinsics[3],
            },
            resolution: Resolution {
                width: dimension(resolution[0])?,
                height: dimension(resolution[1])?,
            },
            distortions: [
                distortion[0],
                distortion[1],
                distortion[2],
                distortion[3],
                distortion[4],
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Saves the model in the layout read by [`RadTanModel::load_from_yaml`].
    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraModelError> {
        let yaml_err = |e: serde_yaml::Error| CameraModelError::YamlError(e.to_string());

        let mut cam = serde_yaml::Mapping::new();
        cam.insert("camera_model".into(), "rad_tan".into());
        cam.insert(
            "intrinsics".into(),
            serde_yaml::to_value(vec![
                self.intrinsics.fx,
                self.intrinsics.fy,
                self.intrinsics.cx,
                self.intrinsics.cy,
            ])
            .map_err(yaml_err)?,
        );
        cam.insert(
            "distortion".into(),
            serde_yaml::to_value(self.distortions.to_vec()).map_err(yaml_err)?,
        );
        cam.insert(
            "resolution".into(),
            serde_yaml::to_value(vec![self.resolution.width, self.resolution.height]).map_err(yaml_err)?,
        );

        let mut root = serde_yaml::Mapping::new();
        root.insert("cam0".into(), serde_yaml::Value::Mapping(cam));
        let yaml_string = serde_yaml::to_string(&root).map_err(yaml_err)?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}

impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    /// Projects a 3D point to pixel coordinates, applying distortion.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`] if `z` is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`] if a resolution is set and
    ///   the pixel falls outside it.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        let uv = self.project_unchecked(point_3d)?;
        if !self.is_inside(uv.x, uv.y) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }
        Ok(uv)
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.is_inside(point_2d.x, point_2d.y) {
            return Err(CameraModelError::PointIsOutSideImage);
        }
        let m = self.undistort_normalized(point_2d)?;
        Ok(Vector3::new(m.x, m.y, 1.0).normalize())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        if self.distortions.iter().any(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "Distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}
