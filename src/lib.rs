//! Chessboard Calibration Library
//!
//! Calibrates a pinhole camera with radial-tangential distortion from a
//! folder of checkerboard images:
//! - directory scanning, batch image loading and gamma correction (`util`)
//! - checkerboard corner detection with sub-pixel refinement (`checkerboard`)
//! - closed-form initialisation and Levenberg-Marquardt refinement of the
//!   intrinsics, distortion and per-view poses (`optimization`), built on the
//!   tiny-solver optimization framework
//! - the batch driver and the parameter file (`calibration`)

pub mod calibration;
pub mod camera;
pub mod checkerboard;
pub mod config;
pub mod geometry;
pub mod optimization;
pub mod synthetic;
pub mod util;

// Re-export commonly used types
pub use calibration::{
    calib_images, CalibrationError, CalibrationReport, FrameSink, NullSink, OverlayWriter,
    ParameterFile, ViewState,
};
pub use camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
pub use checkerboard::{find_chessboard_corners, ChessboardDetection, DetectorParams};
pub use config::CalibrationConfig;
pub use geometry::PatternSize;
pub use optimization::{calibrate_camera, CalibrationFlags, CalibrationResult, Optimizer};
