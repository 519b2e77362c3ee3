//! Checkerboard calibration tool.
//!
//! Loads every image in the configured folder, calibrates the camera and
//! writes the parameter file. Without `--config` the built-in configuration
//! is used (folder `images`, `jpg` files, 8x6 corners, 23 mm squares,
//! output `camera.yaml`).
//!
//! ```bash
//! RUST_LOG=debug chessboard-calib --config calib.yaml --strict
//! ```

use chessboard_calib::calibration::{calib_images, FrameSink, NullSink, OverlayWriter};
use chessboard_calib::config::CalibrationConfig;
use chessboard_calib::util;
use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

/// Camera calibration from checkerboard images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML file overriding the built-in configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Exit with a non-zero status when calibration fails
    #[arg(long)]
    strict: bool,
}

fn run(config: &CalibrationConfig) -> Result<(), Box<dyn Error>> {
    let (images, names) = util::read_images_with_names(&config.folder, &config.file_type);
    info!("Loaded {} images from {}", images.len(), config.folder);

    let mut sink: Box<dyn FrameSink> = match &config.overlay_dir {
        Some(dir) => Box::new(OverlayWriter::new(dir)?),
        None => Box::new(NullSink),
    };
    let mut drawed_images = Vec::with_capacity(images.len());
    let report = calib_images(&images, &mut drawed_images, config, sink.as_mut())?;

    if let Some(csv_path) = &config.corners_csv {
        let accepted_names: Vec<String> = report.accepted.iter().map(|&i| names[i].clone()).collect();
        util::export_corners_csv(csv_path, &accepted_names, &report.image_points)?;
        info!("Wrote corners to {csv_path}");
    }
    if let Some(model_path) = &config.model_output {
        report.result.camera.save_to_yaml(model_path)?;
        info!("Wrote camera model to {model_path}");
    }
    Ok(())
}

/// Exit status for a finished run: failures only count with `--strict`.
fn exit_code<E>(strict: bool, outcome: &Result<(), E>) -> ExitCode {
    if strict && outcome.is_err() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config: Result<CalibrationConfig, Box<dyn Error>> = match &cli.config {
        Some(path) => CalibrationConfig::load_from_yaml(path)
            .map_err(|e| format!("Cannot load config {}: {e}", path.display()).into()),
        None => Ok(CalibrationConfig::default()),
    };
    let outcome = config.and_then(|config| run(&config));

    if let Err(e) = &outcome {
        error!("Calibration failed: {e}");
    }
    exit_code(cli.strict, &outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_exits_zero_unless_strict() {
        let failed: Result<(), String> = Err("no checkerboard found".to_string());
        assert_eq!(exit_code(false, &failed), ExitCode::SUCCESS);
        assert_eq!(exit_code(true, &failed), ExitCode::FAILURE);
    }

    #[test]
    fn test_success_exits_zero() {
        let ok: Result<(), String> = Ok(());
        assert_eq!(exit_code(false, &ok), ExitCode::SUCCESS);
        assert_eq!(exit_code(true, &ok), ExitCode::SUCCESS);
    }

    #[test]
    fn test_empty_folder_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = CalibrationConfig {
            folder: dir.path().to_string_lossy().into_owned(),
            output: dir.path().join("camera.yaml").to_string_lossy().into_owned(),
            ..CalibrationConfig::default()
        };
        let outcome = run(&config);
        assert!(outcome.is_err());
        assert_eq!(exit_code(false, &outcome), ExitCode::SUCCESS);
        assert_eq!(exit_code(true, &outcome), ExitCode::FAILURE);
        assert!(!dir.path().join("camera.yaml").exists());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["chessboard-calib", "--config", "calib.yaml", "--strict"]);
        assert_eq!(cli.config, Some(PathBuf::from("calib.yaml")));
        assert!(cli.strict);

        let cli = Cli::parse_from(["chessboard-calib"]);
        assert!(cli.config.is_none());
        assert!(!cli.strict);
    }
}
