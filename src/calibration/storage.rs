//! The calibration parameter file.
//!
//! Three named fields: `rms`, `intrinsic` (3x3) and `distortion` (1x5), the
//! matrices stored as `{ rows, cols, dt, data }` nodes with row-major data.
//! The format follows the file extension: `.json` is JSON, anything else YAML.

use crate::camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("File can not be opened: {0}")]
    IOError(String),
    #[error("Failed to encode or decode parameter file: {0}")]
    FormatError(String),
    #[error("Matrix node '{0}' has an unexpected shape")]
    BadShape(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StorageError {
    fn from(err: serde_yaml::Error) -> Self {
        StorageError::FormatError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::FormatError(err.to_string())
    }
}

/// A dense matrix of doubles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixNode {
    pub rows: usize,
    pub cols: usize,
    /// Element type tag, `"d"` for f64.
    pub dt: String,
    pub data: Vec<f64>,
}

impl MatrixNode {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        MatrixNode {
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }

    fn check_shape(&self, name: &str, rows: usize, cols: usize) -> Result<(), StorageError> {
        if self.rows != rows || self.cols != cols || self.data.len() != rows * cols {
            return Err(StorageError::BadShape(name.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterFile {
    pub rms: f64,
    pub intrinsic: MatrixNode,
    pub distortion: MatrixNode,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

impl ParameterFile {
    pub fn new(rms: f64, camera_matrix: &Matrix3<f64>, distortion: &[f64]) -> Self {
        // nalgebra iterates column-major; the file stores rows.
        let intrinsic: Vec<f64> = camera_matrix.transpose().iter().copied().collect();
        ParameterFile {
            rms,
            intrinsic: MatrixNode::new(3, 3, intrinsic),
            distortion: MatrixNode::new(1, distortion.len(), distortion.to_vec()),
        }
    }

    pub fn from_model(rms: f64, model: &RadTanModel) -> Self {
        Self::new(rms, &model.intrinsics.to_matrix(), &model.distortions)
    }

    pub fn camera_matrix(&self) -> Result<Matrix3<f64>, StorageError> {
        self.intrinsic.check_shape("intrinsic", 3, 3)?;
        Ok(Matrix3::from_row_slice(&self.intrinsic.data))
    }

    /// Rebuilds the camera model for an image of `resolution`.
    pub fn to_camera_model(&self, resolution: Resolution) -> Result<RadTanModel, CameraModelError> {
        let k = self
            .camera_matrix()
            .map_err(|e| CameraModelError::InvalidParams(e.to_string()))?;
        self.distortion
            .check_shape("distortion", 1, 5)
            .map_err(|e| CameraModelError::InvalidParams(e.to_string()))?;
        let d = &self.distortion.data;

        let model = RadTanModel {
            intrinsics: Intrinsics::from_matrix(&k),
            resolution,
            distortions: [d[0], d[1], d[2], d[3], d[4]],
        };
        model.validate_params()?;
        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        let contents = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let file: ParameterFile = if is_json(path) {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> ParameterFile {
        let k = Matrix3::new(
            812.5, 0.0, 321.25, //
            0.0, 809.75, 239.5, //
            0.0, 0.0, 1.0,
        );
        ParameterFile::new(0.3125, &k, &[-0.21, 0.07, 0.001, -0.0005, 0.0])
    }

    #[test]
    fn test_intrinsic_is_row_major() {
        let file = sample();
        assert_eq!(file.intrinsic.data[2], 321.25);
        assert_eq!(file.intrinsic.data[5], 239.5);
        assert_eq!(file.intrinsic.data[8], 1.0);
        assert_eq!(file.intrinsic.dt, "d");
        assert_eq!((file.distortion.rows, file.distortion.cols), (1, 5));
    }

    #[test]
    fn test_yaml_and_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = sample();
        for name in ["camera.yaml", "camera.json", "camera.yml"] {
            let path = dir.path().join(name);
            file.save(&path).unwrap();
            assert_eq!(ParameterFile::load(&path).unwrap(), file);
        }

        let json = fs::read_to_string(dir.path().join("camera.json")).unwrap();
        assert!(json.trim_start().starts_with('{'));
        let yaml = fs::read_to_string(dir.path().join("camera.yaml")).unwrap();
        for field in ["rms:", "intrinsic:", "distortion:"] {
            assert!(yaml.contains(field));
        }
    }

    #[test]
    fn test_to_camera_model() {
        let resolution = Resolution {
            width: 640,
            height: 480,
        };
        let model = sample().to_camera_model(resolution).unwrap();
        assert_relative_eq!(model.intrinsics.fx, 812.5);
        assert_relative_eq!(model.intrinsics.cy, 239.5);
        assert_relative_eq!(model.distortions[0], -0.21);
        assert_eq!(model.resolution, resolution);

        let round = ParameterFile::from_model(0.3125, &model);
        assert_eq!(round, sample());
    }

    #[test]
    fn test_bad_shapes_are_rejected() {
        let mut file = sample();
        file.distortion.data.pop();
        assert!(file
            .to_camera_model(Resolution {
                width: 1,
                height: 1
            })
            .is_err());

        let mut file = sample();
        file.intrinsic.rows = 2;
        assert!(matches!(file.camera_matrix(), Err(StorageError::BadShape(_))));
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("camera.yaml");
        assert!(matches!(sample().save(&path), Err(StorageError::IOError(_))));
    }
}
