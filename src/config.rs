//! Run configuration for a calibration batch.
//!
//! [`CalibrationConfig::default`] is the fixed configuration the binary runs
//! with; a YAML file can override any subset of the fields.

use crate::checkerboard::DetectorParams;
use crate::geometry::PatternSize;
use crate::optimization::CalibrationFlags;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to parse YAML config: {0}")]
    YamlError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::YamlError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Directory scanned for images.
    pub folder: String,
    /// Substring an image file name must contain.
    pub file_type: String,
    /// Interior corners per board column.
    pub rows: usize,
    /// Interior corners per board row.
    pub cols: usize,
    /// Physical square side; the calibrated translations use this unit.
    pub square_size: f64,
    /// Parameter file; `.json` selects JSON, anything else YAML.
    pub output: String,
    /// Optional camera model file in the `cam0` YAML layout.
    pub model_output: Option<String>,
    /// Directory receiving one overlay PNG per image.
    pub overlay_dir: Option<String>,
    /// Pause after each overlay, in milliseconds.
    pub display_delay_ms: u64,
    /// CSV file receiving the accepted corners.
    pub corners_csv: Option<String>,
    pub detector: DetectorParams,
    pub flags: CalibrationFlags,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            folder: "images".to_string(),
            file_type: "jpg".to_string(),
            rows: 8,
            cols: 6,
            square_size: 23.0,
            output: "camera.yaml".to_string(),
            model_output: None,
            overlay_dir: None,
            display_delay_ms: 0,
            corners_csv: None,
            detector: DetectorParams::default(),
            flags: CalibrationFlags::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: CalibrationConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn pattern(&self) -> PatternSize {
        PatternSize::new(self.rows, self.cols)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows < 2 || self.cols < 2 {
            return Err(ConfigError::Invalid(format!(
                "board needs at least 2x2 interior corners, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !self.square_size.is_finite() || self.square_size <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "square size must be positive, got {}",
                self.square_size
            )));
        }
        if self.output.is_empty() {
            return Err(ConfigError::Invalid("output path is empty".to_string()));
        }
        if self.detector.ring_radii.is_empty() || self.detector.ring_radii.contains(&0) {
            return Err(ConfigError::Invalid(
                "detector ring radii must be non-empty and positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.detector.threshold_rel) {
            return Err(ConfigError::Invalid(format!(
                "detector threshold_rel must be in [0, 1), got {}",
                self.detector.threshold_rel
            )));
        }
        Ok(())
    }
}
