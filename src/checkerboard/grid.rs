//! Assembly of corner candidates into an ordered checkerboard lattice.
//!
//! From a seed candidate the lattice is grown breadth-first: the position of
//! each missing neighbour is predicted from the cells already placed and the
//! nearest free candidate inside a search radius is assigned to it.

use super::response::CornerCandidate;
use crate::geometry::PatternSize;
use log::debug;
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};

type Cell = (i32, i32);

const DIRECTIONS: [Cell; 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Neighbours whose directions have a larger |cos| are treated as collinear.
const MAX_BASIS_COS: f64 = 0.75;

/// Search radius as a fraction of the predicted step length.
const SEARCH_RATIO: f64 = 0.4;

/// Result of lattice assembly.
#[derive(Debug, Clone, Default)]
pub struct GridAssembly {
    pub found: bool,
    /// `rows * cols` points in row-major order when `found`, otherwise the
    /// points of the largest partial lattice in no particular order.
    pub corners: Vec<Point2<f64>>,
}

/// Tries up to `max_seeds` candidates (strongest first) as lattice origins.
pub fn assemble_grid(
    candidates: &[CornerCandidate],
    pattern: PatternSize,
    max_seeds: usize,
) -> GridAssembly {
    let points: Vec<Point2<f64>> = candidates.iter().map(|c| c.position).collect();
    let mut largest: HashMap<Cell, usize> = HashMap::new();

    for seed in 0..points.len().min(max_seeds) {
        let Some(basis) = seed_basis(&points, seed) else {
            continue;
        };
        let lattice = grow_lattice(&points, seed, basis);

        if let Some(ordered) = extract_pattern(&lattice, pattern) {
            debug!("Lattice from seed {seed} covers the {pattern} pattern");
            let corners = ordered.iter().map(|&i| points[i]).collect();
            return GridAssembly {
                found: true,
                corners: canonical_order(corners, pattern),
            };
        }
        if lattice.len() > largest.len() {
            largest = lattice;
        }
    }

    GridAssembly {
        found: false,
        corners: largest.values().map(|&i| points[i]).collect(),
    }
}

/// Lattice basis at a seed: its nearest neighbour and the nearest
/// neighbour in a clearly different direction.
fn seed_basis(points: &[Point2<f64>], seed: usize) -> Option<(Vector2<f64>, Vector2<f64>)> {
    let origin = points[seed];
    let mut by_distance: Vec<(f64, usize)> = points
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != seed)
        .map(|(i, p)| ((p - origin).norm(), i))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

    let &(dist_a, idx_a) = by_distance.first()?;
    if dist_a <= f64::EPSILON {
        return None;
    }
    let a = points[idx_a] - origin;

    by_distance
        .iter()
        .skip(1)
        .take_while(|(d, _)| *d < 2.0 * dist_a)
        .find(|&&(d, i)| {
            let v = points[i] - origin;
            (a.dot(&v) / (dist_a * d)).abs() < MAX_BASIS_COS
        })
        .map(|&(_, i)| (a, points[i] - origin))
}

fn grow_lattice(
    points: &[Point2<f64>],
    seed: usize,
    basis: (Vector2<f64>, Vector2<f64>),
) -> HashMap<Cell, usize> {
    let mut cells = HashMap::new();
    let mut used = vec![false; points.len()];
    cells.insert((0, 0), seed);
    used[seed] = true;

    let mut queue = VecDeque::from([(0, 0)]);
    while let Some(cell) = queue.pop_front() {
        let Some(&here_idx) = cells.get(&cell) else {
            continue;
        };
        let here = points[here_idx];

        for dir in DIRECTIONS {
            let target = (cell.0 + dir.0, cell.1 + dir.1);
            if cells.contains_key(&target) {
                continue;
            }
            let step = predict_step(&cells, points, cell, dir, basis);
            let predicted = here + step;
            let radius = SEARCH_RATIO * step.norm();

            if let Some(found) = nearest_free(points, &used, &predicted, radius) {
                cells.insert(target, found);
                used[found] = true;
                queue.push_back(target);
            }
        }
    }
    cells
}

/// Expected displacement from `cell` to its neighbour in `dir`.
///
/// Extrapolates from the opposite neighbour, then from the same step in an
/// adjacent row or column, then falls back to the seed basis.
fn predict_step(
    cells: &HashMap<Cell, usize>,
    points: &[Point2<f64>],
    cell: Cell,
    dir: Cell,
    basis: (Vector2<f64>, Vector2<f64>),
) -> Vector2<f64> {
    let at = |c: Cell| cells.get(&c).map(|&i| points[i]);

    if let (Some(here), Some(prev)) = (at(cell), at((cell.0 - dir.0, cell.1 - dir.1))) {
        return here - prev;
    }

    let perp = (dir.1, dir.0);
    for side in [1, -1] {
        let c = (cell.0 + side * perp.0, cell.1 + side * perp.1);
        if let (Some(p), Some(q)) = (at(c), at((c.0 + dir.0, c.1 + dir.1))) {
            return q - p;
        }
    }

    let (a, b) = basis;
    match dir {
        (1, 0) => a,
        (-1, 0) => -a,
        (0, 1) => b,
        _ => -b,
    }
}

fn nearest_free(
    points: &[Point2<f64>],
    used: &[bool],
    target: &Point2<f64>,
    radius: f64,
) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .filter(|&(i, _)| !used[i])
        .map(|(i, p)| ((p - target).norm(), i))
        .filter(|&(d, _)| d <= radius)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, i)| i)
}

/// Finds the unique fully populated `rows x cols` window of the lattice, in
/// either orientation, and returns its point indices in row-major order.
fn extract_pattern(cells: &HashMap<Cell, usize>, pattern: PatternSize) -> Option<Vec<usize>> {
    if cells.len() < pattern.corner_count() {
        return None;
    }
    let min_i = cells.keys().map(|c| c.0).min()?;
    let max_i = cells.keys().map(|c| c.0).max()?;
    let min_j = cells.keys().map(|c| c.1).min()?;
    let max_j = cells.keys().map(|c| c.1).max()?;

    let (rows, cols) = (pattern.rows as i32, pattern.cols as i32);
    let mut orientations = vec![(rows, cols, false)];
    if rows != cols {
        orientations.push((cols, rows, true));
    }

    let mut windows = Vec::new();
    for (extent_i, extent_j, transposed) in orientations {
        for i0 in min_i..=max_i - extent_i + 1 {
            for j0 in min_j..=max_j - extent_j + 1 {
                let filled = (0..extent_i)
                    .all(|di| (0..extent_j).all(|dj| cells.contains_key(&(i0 + di, j0 + dj))));
                if filled {
                    windows.push((i0, j0, transposed));
                }
            }
        }
    }
    if windows.len() != 1 {
        if windows.len() > 1 {
            debug!("Ambiguous lattice: {} candidate windows", windows.len());
        }
        return None;
    }

    let (i0, j0, transposed) = windows[0];
    let mut ordered = Vec::with_capacity(pattern.corner_count());
    for r in 0..rows {
        for c in 0..cols {
            let cell = if transposed {
                (i0 + c, j0 + r)
            } else {
                (i0 + r, j0 + c)
            };
            ordered.push(*cells.get(&cell)?);
        }
    }
    Some(ordered)
}

/// Flips rows and/or columns so that the first corner is the grid corner
/// closest to the image origin.
fn canonical_order(corners: Vec<Point2<f64>>, pattern: PatternSize) -> Vec<Point2<f64>> {
    let (rows, cols) = (pattern.rows, pattern.cols);
    let index = |r: usize, c: usize, flip_r: bool, flip_c: bool| {
        let r = if flip_r { rows - 1 - r } else { r };
        let c = if flip_c { cols - 1 - c } else { c };
        r * cols + c
    };

    let (flip_r, flip_c) = [(false, false), (true, false), (false, true), (true, true)]
        .into_iter()
        .min_by(|&(fr, fc), &(gr, gc)| {
            let p = corners[index(0, 0, fr, fc)];
            let q = corners[index(0, 0, gr, gc)];
            (p.x + p.y).total_cmp(&(q.x + q.y))
        })
        .unwrap_or((false, false));

    let mut ordered = Vec::with_capacity(corners.len());
    for r in 0..rows {
        for c in 0..cols {
            ordered.push(corners[index(r, c, flip_r, flip_c)]);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates_from(points: &[Point2<f64>]) -> Vec<CornerCandidate> {
        points
            .iter()
            .enumerate()
            .map(|(i, &position)| CornerCandidate {
                position,
                response: 1000.0 - i as f32,
            })
            .collect()
    }

    /// Slightly sheared grid of `nu` by `nv` points.
    fn lattice_points(nu: usize, nv: usize) -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for v in 0..nv {
            for u in 0..nu {
                pts.push(Point2::new(
                    100.0 + 30.0 * u as f64 + 2.0 * v as f64,
                    80.0 + 28.0 * v as f64 + 1.5 * u as f64,
                ));
            }
        }
        pts
    }

    #[test]
    fn test_assemble_full_grid_in_canonical_order() {
        let pattern = PatternSize::new(8, 6);
        let mut points = lattice_points(6, 8);
        // Start from a corner in the middle of the board.
        points.swap(0, 27);
        let result = assemble_grid(&candidates_from(&points), pattern, 20);

        assert!(result.found);
        assert_eq!(result.corners.len(), 48);
        assert_eq!(result.corners[0], Point2::new(100.0, 80.0));
        for r in 0..8 {
            for c in 0..5 {
                let step = result.corners[r * 6 + c + 1] - result.corners[r * 6 + c];
                let next_row = result.corners[(r + 1).min(7) * 6 + c] - result.corners[r * 6 + c];
                assert!(step.norm() > 25.0 && step.norm() < 35.0);
                if r < 7 {
                    assert!(next_row.norm() > 25.0 && next_row.norm() < 35.0);
                }
            }
        }
    }

    #[test]
    fn test_assemble_transposed_grid() {
        let pattern = PatternSize::new(8, 6);
        let points = lattice_points(8, 6);
        let result = assemble_grid(&candidates_from(&points), pattern, 20);

        assert!(result.found);
        assert_eq!(result.corners.len(), 48);
        assert_eq!(result.corners[0], Point2::new(100.0, 80.0));
    }

    #[test]
    fn test_ignores_outlier_candidates() {
        let pattern = PatternSize::new(4, 3);
        let mut points = lattice_points(3, 4);
        points.push(Point2::new(400.0, 400.0));
        points.push(Point2::new(113.0, 300.0));
        let result = assemble_grid(&candidates_from(&points), pattern, 20);

        assert!(result.found);
        assert!(result.corners.iter().all(|p| p.x < 200.0 && p.y < 200.0));
    }

    #[test]
    fn test_incomplete_grid_returns_partial_lattice() {
        let pattern = PatternSize::new(8, 6);
        let mut points = lattice_points(6, 8);
        points.truncate(40);
        let result = assemble_grid(&candidates_from(&points), pattern, 20);

        assert!(!result.found);
        assert_eq!(result.corners.len(), 40);
    }

    #[test]
    fn test_larger_lattice_with_unique_window() {
        let pattern = PatternSize::new(3, 3);
        let mut points = lattice_points(3, 3);
        // One extra corner next to the board leaves only one full 3x3 window.
        points.push(Point2::new(100.0 + 90.0, 80.0 + 4.5));
        let result = assemble_grid(&candidates_from(&points), pattern, 20);

        assert!(result.found);
        assert_eq!(result.corners.len(), 9);
        assert!(result.corners.iter().all(|p| p.x < 180.0));
    }
}
