//! Checkerboard interior-corner detection.
//!
//! [`find_chessboard_corners`] blurs the image, computes a ChESS response
//! ([`response`]), assembles the peaks into a lattice ([`grid`]) and refines
//! the ordered corners with [`corner_sub_pix`].

pub mod draw;
pub mod grid;
pub mod response;
pub mod subpix;

pub use draw::draw_chessboard_corners;
pub use subpix::corner_sub_pix;

use crate::geometry::PatternSize;
use grid::assemble_grid;
use image::{imageops, GrayImage};
use log::debug;
use nalgebra::Point2;
use response::{chess_response, detect_peaks};
use serde::{Deserialize, Serialize};

/// Tunable parameters of the corner detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Gaussian pre-blur sigma in pixels.
    pub blur_sigma: f32,
    /// ChESS ring radii, tried in order until the board is found.
    pub ring_radii: Vec<u32>,
    /// Response threshold as a fraction of the maximum response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    /// Minimum count of above-threshold neighbours in the NMS window.
    pub min_cluster_size: u32,
    /// Number of strongest candidates tried as lattice seeds.
    pub max_seeds: usize,
    /// Run [`corner_sub_pix`] on the ordered corners.
    pub refine: bool,
    pub refine_max_iterations: usize,
    /// Refinement stops once a corner moves less than this, in pixels.
    pub refine_epsilon: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            ring_radii: vec![5, 10],
            threshold_rel: 0.1,
            nms_radius: 3,
            min_cluster_size: 2,
            max_seeds: 20,
            refine: true,
            refine_max_iterations: 20,
            refine_epsilon: 0.01,
        }
    }
}

/// Outcome of a corner search on one image.
#[derive(Debug, Clone, Default)]
pub struct ChessboardDetection {
    pub found: bool,
    /// `rows * cols` corners in row-major order when `found`; otherwise the
    /// largest partial lattice, useful only for drawing.
    pub corners: Vec<Point2<f64>>,
}

/// Searches `img` for the interior corners of a `pattern` checkerboard.
pub fn find_chessboard_corners(
    img: &GrayImage,
    pattern: PatternSize,
    params: &DetectorParams,
) -> ChessboardDetection {
    if pattern.rows < 2 || pattern.cols < 2 {
        return ChessboardDetection::default();
    }

    let blurred = if params.blur_sigma > 0.0 {
        imageops::blur(img, params.blur_sigma)
    } else {
        img.clone()
    };

    let mut partial: Vec<Point2<f64>> = Vec::new();
    for &radius in &params.ring_radii {
        let response = chess_response(&blurred, radius);
        let candidates = detect_peaks(&response, params);
        debug!(
            "Ring radius {radius}: {} corner candidates for a {pattern} pattern",
            candidates.len()
        );
        if candidates.len() < pattern.corner_count() {
            if candidates.len() > partial.len() {
                partial = candidates.iter().map(|c| c.position).collect();
            }
            continue;
        }

        let assembly = assemble_grid(&candidates, pattern, params.max_seeds);
        if assembly.found {
            let mut corners = assembly.corners;
            if params.refine {
                let half_window = refine_half_window(&corners, pattern);
                corner_sub_pix(
                    &blurred,
                    &mut corners,
                    half_window,
                    params.refine_max_iterations,
                    params.refine_epsilon,
                );
            }
            return ChessboardDetection {
                found: true,
                corners,
            };
        }
        if assembly.corners.len() > partial.len() {
            partial = assembly.corners;
        }
    }

    ChessboardDetection {
        found: false,
        corners: partial,
    }
}

/// Window half-size from the median spacing of neighbouring corners.
fn refine_half_window(corners: &[Point2<f64>], pattern: PatternSize) -> u32 {
    let mut steps: Vec<f64> = corners
        .chunks(pattern.cols)
        .flat_map(|row| row.windows(2).map(|pair| (pair[1] - pair[0]).norm()))
        .collect();
    if steps.is_empty() {
        return 2;
    }
    steps.sort_by(|a, b| a.total_cmp(b));
    let median = steps[steps.len() / 2];
    (0.3 * median).round().clamp(2.0, 8.0) as u32
}
