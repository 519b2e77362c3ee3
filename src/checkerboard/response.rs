//! ChESS corner response and peak extraction.
//!
//! The response compares opposite and quadrature samples of a 16-point ring
//! around each pixel: `R = SR - DR - 16 * MR`, where `SR` rewards the
//! alternating pattern of an X-junction, `DR` penalises edges and `MR`
//! penalises a ring mean that differs from the local centre mean.

use super::DetectorParams;
use image::GrayImage;
use nalgebra::Point2;

/// Dense response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// A response peak with sub-pixel position.
#[derive(Clone, Copy, Debug)]
pub struct CornerCandidate {
    pub position: Point2<f64>,
    pub response: f32,
}

/// Pixel offsets of the 16 ring samples, counter-clockwise from +x.
pub fn ring_offsets(radius: u32) -> [(i32, i32); 16] {
    let r = radius as f64;
    let mut offsets = [(0, 0); 16];
    for (k, offset) in offsets.iter_mut().enumerate() {
        let angle = k as f64 * std::f64::consts::FRAC_PI_8;
        *offset = (
            (r * angle.cos()).round() as i32,
            (r * angle.sin()).round() as i32,
        );
    }
    offsets
}

/// Computes the dense ChESS response for a ring of the given radius.
///
/// Pixels closer than `radius + 1` to the border get a response of zero.
pub fn chess_response(img: &GrayImage, radius: u32) -> ResponseMap {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut data = vec![0.0f32; w * h];
    let margin = radius as usize + 1;
    if w <= 2 * margin || h <= 2 * margin {
        return ResponseMap { w, h, data };
    }

    let ring = ring_offsets(radius);
    let raw = img.as_raw();
    let px = |x: i64, y: i64| raw[y as usize * w + x as usize] as f32;

    for y in margin..h - margin {
        for x in margin..w - margin {
            let (xi, yi) = (x as i64, y as i64);

            let mut s = [0.0f32; 16];
            for (sample, &(dx, dy)) in s.iter_mut().zip(ring.iter()) {
                *sample = px(xi + dx as i64, yi + dy as i64);
            }

            let mut sum_response = 0.0;
            for n in 0..4 {
                sum_response += ((s[n] + s[n + 8]) - (s[n + 4] + s[n + 12])).abs();
            }
            let mut diff_response = 0.0;
            for n in 0..8 {
                diff_response += (s[n] - s[n + 8]).abs();
            }

            let ring_mean = s.iter().sum::<f32>() / 16.0;
            let mut local_mean = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    local_mean += px(xi + dx, yi + dy);
                }
            }
            local_mean /= 9.0;
            let mean_response = (ring_mean - local_mean).abs();

            data[y * w + x] = sum_response - diff_response - 16.0 * mean_response;
        }
    }

    ResponseMap { w, h, data }
}

/// Thresholds the response, keeps local maxima and refines each one with a
/// 5x5 centre of mass. Candidates are sorted by decreasing response.
pub fn detect_peaks(response: &ResponseMap, params: &DetectorParams) -> Vec<CornerCandidate> {
    let max = response.max();
    if max.is_nan() || max <= 0.0 {
        return Vec::new();
    }
    let threshold = params.threshold_rel * max;
    let r = params.nms_radius as i64;
    let (w, h) = (response.w as i64, response.h as i64);

    let mut candidates = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let v = response.at(x as usize, y as usize);
            if v <= threshold {
                continue;
            }

            let mut is_max = true;
            let mut cluster = 0u32;
            'window: for ny in (y - r).max(0)..=(y + r).min(h - 1) {
                for nx in (x - r).max(0)..=(x + r).min(w - 1) {
                    if nx == x && ny == y {
                        continue;
                    }
                    let q = response.at(nx as usize, ny as usize);
                    // Ties go to the first pixel in raster order.
                    let earlier = (ny, nx) < (y, x);
                    if q > v || (q == v && earlier) {
                        is_max = false;
                        break 'window;
                    }
                    if q > threshold {
                        cluster += 1;
                    }
                }
            }
            if !is_max || cluster < params.min_cluster_size {
                continue;
            }

            candidates.push(CornerCandidate {
                position: refine_center_of_mass(response, x, y),
                response: v,
            });
        }
    }

    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
    candidates
}

fn refine_center_of_mass(response: &ResponseMap, x: i64, y: i64) -> Point2<f64> {
    let (w, h) = (response.w as i64, response.h as i64);
    let (mut sx, mut sy, mut sw) = (0.0f64, 0.0f64, 0.0f64);
    for ny in (y - 2).max(0)..=(y + 2).min(h - 1) {
        for nx in (x - 2).max(0)..=(x + 2).min(w - 1) {
            let v = response.at(nx as usize, ny as usize).max(0.0) as f64;
            sx += v * nx as f64;
            sy += v * ny as f64;
            sw += v;
        }
    }
    if sw > 0.0 {
        Point2::new(sx / sw, sy / sw)
    } else {
        Point2::new(x as f64, y as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn quadrant_image(size: u32, cx: u32, cy: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let dark = (x < cx) == (y < cy);
            Luma([if dark { 20 } else { 230 }])
        })
    }

    #[test]
    fn test_ring_offsets_lie_on_circle() {
        for radius in [5u32, 10] {
            let ring = ring_offsets(radius);
            assert_eq!(ring[0], (radius as i32, 0));
            assert_eq!(ring[4], (0, radius as i32));
            assert_eq!(ring[8], (-(radius as i32), 0));
            for &(dx, dy) in &ring {
                let d = ((dx * dx + dy * dy) as f64).sqrt();
                assert!((d - radius as f64).abs() < 1.0);
            }
        }
    }

    #[test]
    fn test_response_peaks_at_x_junction() {
        let img = quadrant_image(41, 20, 20);
        let response = chess_response(&img, 5);

        let corner = response.at(20, 20).max(response.at(19, 19));
        assert!(corner > 0.0);
        // Straight edge away from the junction.
        assert!(response.at(20, 8) < corner * 0.1);
        // Flat region.
        assert!(response.at(8, 32).abs() < 1e-3);
    }

    #[test]
    fn test_detect_peaks_strongest_is_the_junction() {
        let img = quadrant_image(41, 20, 20);
        let response = chess_response(&img, 5);
        let params = DetectorParams::default();

        let peaks = detect_peaks(&response, &params);
        assert!(!peaks.is_empty());
        assert!((peaks[0].position.x - 19.5).abs() < 1.0);
        assert!((peaks[0].position.y - 19.5).abs() < 1.0);
    }

    #[test]
    fn test_detect_peaks_on_flat_image_is_empty() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        let response = chess_response(&img, 5);
        assert!(detect_peaks(&response, &DetectorParams::default()).is_empty());
    }
}
