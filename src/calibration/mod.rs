//! The calibration driver.
//!
//! [`calib_images`] searches every image for the configured checkerboard,
//! hands an overlay of each search to a [`FrameSink`], calibrates the camera
//! from the accepted views and writes the parameter file.

pub mod storage;

pub use storage::{MatrixNode, ParameterFile, StorageError};

use crate::camera::{CameraModelError, Resolution};
use crate::checkerboard::{draw_chessboard_corners, find_chessboard_corners};
use crate::config::{CalibrationConfig, ConfigError};
use crate::geometry::object_grid;
use crate::optimization::{calibrate_camera, CalibrationResult};
use crate::util::{ensure_dir, UtilError};
use image::{imageops, RgbImage};
use log::{debug, error, info, warn};
use nalgebra::{Point2, Point3};
use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("No checkerboard corners found in any of the {0} images")]
    NoCornersFound(usize),
    #[error("Calibration failed: {0}")]
    Camera(#[from] CameraModelError),
    #[error("Cannot write parameter file: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Util(#[from] UtilError),
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Progress of one image through the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Loaded,
    CornersSearched,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ViewOutcome {
    /// Position of the image in the input batch.
    pub index: usize,
    pub state: ViewState,
    /// Corners drawn on the overlay (all of them when accepted).
    pub corners_found: usize,
}

#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub result: CalibrationResult,
    pub views: Vec<ViewOutcome>,
    /// Batch indices of the accepted images, parallel to `image_points`.
    pub accepted: Vec<usize>,
    pub image_points: Vec<Vec<Point2<f64>>>,
    pub parameter_file: PathBuf,
}

/// Receives the overlay of every processed image.
pub trait FrameSink {
    fn show(&mut self, index: usize, overlay: &RgbImage) -> Result<(), UtilError>;
}

/// Discards overlays.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _index: usize, _overlay: &RgbImage) -> Result<(), UtilError> {
        Ok(())
    }
}

/// Saves each overlay as `overlay_<index>.png` in a directory.
#[derive(Debug, Clone)]
pub struct OverlayWriter {
    dir: PathBuf,
}

impl OverlayWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, UtilError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(OverlayWriter { dir })
    }
}

impl FrameSink for OverlayWriter {
    fn show(&mut self, index: usize, overlay: &RgbImage) -> Result<(), UtilError> {
        let path = self.dir.join(format!("overlay_{index:03}.png"));
        overlay.save(&path)?;
        debug!("Saved overlay {}", path.display());
        Ok(())
    }
}

/// Calibrates a camera from checkerboard images.
///
/// Every image's overlay is appended to `drawed_images` and shown on `sink`,
/// whether or not the board was found. The first accepted image sets the
/// reference size. The result is written to `config.output`.
///
/// # Errors
///
/// * [`CalibrationError::NoCornersFound`] if no image contains the board; no
///   file is written.
/// * [`CalibrationError::Storage`] if the parameter file cannot be written.
pub fn calib_images(
    images: &[RgbImage],
    drawed_images: &mut Vec<RgbImage>,
    config: &CalibrationConfig,
    sink: &mut dyn FrameSink,
) -> Result<CalibrationReport, CalibrationError> {
    config.validate()?;
    let pattern = config.pattern();
    let object = object_grid(pattern, config.square_size);
    let delay = Duration::from_millis(config.display_delay_ms);

    let mut object_points: Vec<Vec<Point3<f64>>> = Vec::new();
    let mut image_points: Vec<Vec<Point2<f64>>> = Vec::new();
    let mut accepted = Vec::new();
    let mut views = Vec::with_capacity(images.len());
    let mut reference: Option<Resolution> = None;

    for (index, image) in images.iter().enumerate() {
        let mut state = ViewState::Loaded;
        debug!("Image {index}: {state:?}");

        let detection =
            find_chessboard_corners(&imageops::grayscale(image), pattern, &config.detector);
        state = ViewState::CornersSearched;
        debug!("Image {index}: {state:?}, {} corners", detection.corners.len());

        let mut overlay = image.clone();
        draw_chessboard_corners(&mut overlay, pattern, &detection.corners, detection.found);
        if let Err(e) = sink.show(index, &overlay) {
            warn!("Cannot show overlay of image {index}: {e}");
        }
        drawed_images.push(overlay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        state = if detection.found {
            if reference.is_none() {
                reference = Some(Resolution {
                    width: image.width(),
                    height: image.height(),
                });
            }
            object_points.push(object.clone());
            image_points.push(detection.corners.clone());
            accepted.push(index);
            ViewState::Accepted
        } else {
            ViewState::Rejected
        };
        info!("Image {index}: {state:?}");

        views.push(ViewOutcome {
            index,
            state,
            corners_found: detection.corners.len(),
        });
    }

    let Some(resolution) = reference else {
        error!("No checkerboard found in {} images", images.len());
        return Err(CalibrationError::NoCornersFound(images.len()));
    };
    info!(
        "Calibrating from {} of {} images at {}x{}",
        accepted.len(),
        images.len(),
        resolution.width,
        resolution.height
    );

    let result = calibrate_camera(
        &object_points,
        &image_points,
        resolution,
        &config.flags,
        false,
    )?;
    info!("RMS reprojection error: {:.4} px", result.rms);
    info!("Camera: {:?}", result.camera);

    let parameter_file = PathBuf::from(&config.output);
    if let Err(e) = ParameterFile::from_model(result.rms, &result.camera).save(&parameter_file) {
        error!("File can not be opened: {} ({e})", parameter_file.display());
        return Err(e.into());
    }
    info!("Wrote {}", parameter_file.display());

    Ok(CalibrationReport {
        result,
        views,
        accepted,
        image_points,
        parameter_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, RadTanModel};
    use crate::geometry::PatternSize;
    use crate::synthetic::{default_board_views, render_checkerboard};
    use approx::assert_relative_eq;
    use image::Rgb;

    fn test_camera() -> RadTanModel {
        RadTanModel {
            intrinsics: Intrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: 319.5,
                cy: 239.5,
            },
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            distortions: [-0.05, 0.01, 0.0, 0.0, 0.0],
        }
    }

    fn board_images(count: usize) -> Vec<RgbImage> {
        let camera = test_camera();
        default_board_views()
            .iter()
            .take(count)
            .map(|view| render_checkerboard(&camera, PatternSize::new(8, 6), 23.0, view).unwrap())
            .collect()
    }

    fn config_in(dir: &tempfile::TempDir, output: &str) -> CalibrationConfig {
        CalibrationConfig {
            output: dir.path().join(output).to_string_lossy().into_owned(),
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn test_calibrates_rendered_views() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "camera.yaml");
        let images = board_images(4);
        let mut drawed = Vec::new();
        let mut sink = OverlayWriter::new(dir.path().join("overlays")).unwrap();

        let report = calib_images(&images, &mut drawed, &config, &mut sink).unwrap();

        assert_eq!(drawed.len(), 4);
        assert_eq!(report.accepted, vec![0, 1, 2, 3]);
        assert!(report.views.iter().all(|v| v.state == ViewState::Accepted));
        assert!(report.result.rms < 0.5, "rms {}", report.result.rms);
        assert_relative_eq!(report.result.camera.intrinsics.fx, 600.0, max_relative = 0.02);
        assert_relative_eq!(report.result.camera.intrinsics.fy, 600.0, max_relative = 0.02);

        let saved = ParameterFile::load(&report.parameter_file).unwrap();
        assert_relative_eq!(saved.rms, report.result.rms);
        assert_eq!(saved.intrinsic.data.len(), 9);
        assert_eq!(saved.distortion.data.len(), 5);
        for index in 0..4 {
            assert!(dir
                .path()
                .join("overlays")
                .join(format!("overlay_{index:03}.png"))
                .exists());
        }
    }

    #[test]
    fn test_no_corners_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "camera.yaml");
        let images = vec![
            RgbImage::from_pixel(160, 120, Rgb([200, 200, 200])),
            RgbImage::from_fn(160, 120, |x, _| Rgb([(x % 256) as u8, 0, 0])),
        ];
        let mut drawed = Vec::new();

        let result = calib_images(&images, &mut drawed, &config, &mut NullSink);

        assert!(matches!(result, Err(CalibrationError::NoCornersFound(2))));
        assert_eq!(drawed.len(), 2);
        assert!(!dir.path().join("camera.yaml").exists());
    }

    #[test]
    fn test_single_board_among_other_images() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "camera.json");
        let mut images = vec![RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]))];
        images.extend(board_images(1));
        let mut drawed = Vec::new();

        let report = calib_images(&images, &mut drawed, &config, &mut NullSink).unwrap();

        assert_eq!(report.accepted, vec![1]);
        assert_eq!(report.views[0].state, ViewState::Rejected);
        assert_eq!(
            report.result.camera.resolution,
            Resolution {
                width: 640,
                height: 480
            }
        );
        let contents = std::fs::read_to_string(&report.parameter_file).unwrap();
        assert!(!contents.is_empty());
        assert!(ParameterFile::load(&report.parameter_file).is_ok());
    }

    #[test]
    fn test_unwritable_output_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, "missing/camera.yaml");
        let images = board_images(2);
        let mut drawed = Vec::new();

        let result = calib_images(&images, &mut drawed, &config, &mut NullSink);
        assert!(matches!(result, Err(CalibrationError::Storage(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_search() {
        let config = CalibrationConfig {
            rows: 0,
            ..CalibrationConfig::default()
        };
        let mut drawed = Vec::new();
        let result = calib_images(&board_images(1), &mut drawed, &config, &mut NullSink);
        assert!(matches!(result, Err(CalibrationError::InvalidConfig(_))));
        assert!(drawed.is_empty());
    }
}
