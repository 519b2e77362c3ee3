//! Lookup-table gamma correction.

use super::UtilError;
use image::RgbImage;

/// Builds `lut[i] = 255 * (i / 255)^(1 / gamma)`, rounded and clamped to `u8`.
///
/// `gamma == 0` is accepted and maps every level below 255 to 0.
pub fn build_gamma_lut(gamma: f64) -> Result<[u8; 256], UtilError> {
    if !gamma.is_finite() || gamma < 0.0 {
        return Err(UtilError::InvalidParams(format!(
            "gamma must be finite and non-negative, got {gamma}"
        )));
    }
    let exponent = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let value = (i as f64 / 255.0).powf(exponent) * 255.0;
        *entry = value.round().clamp(0.0, 255.0) as u8;
    }
    Ok(lut)
}

/// Applies gamma correction to every channel of `img`, returning a new image.
pub fn gamma_correction(img: &RgbImage, gamma: f64) -> Result<RgbImage, UtilError> {
    let lut = build_gamma_lut(gamma)?;
    let mut corrected = img.clone();
    for pixel in corrected.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = lut[*channel as usize];
        }
    }
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_lut_matches_formula() {
        for gamma in [0.5, 1.0, 2.2] {
            let lut = build_gamma_lut(gamma).unwrap();
            for (i, &v) in lut.iter().enumerate() {
                let expected = 255.0 * (i as f64 / 255.0).powf(1.0 / gamma);
                assert!((v as f64 - expected).abs() <= 0.5 + 1e-9, "gamma {gamma}, i {i}");
            }
        }
    }

    #[test]
    fn test_identity_gamma_keeps_image() {
        let img = RgbImage::from_fn(16, 4, |x, y| Rgb([(x * 16) as u8, (y * 60) as u8, 200]));
        assert_eq!(gamma_correction(&img, 1.0).unwrap(), img);
    }

    #[test]
    fn test_gamma_brightens_mid_tones() {
        let img = RgbImage::from_pixel(2, 2, Rgb([64, 128, 255]));
        let out = gamma_correction(&img, 2.2).unwrap();
        let p = out.get_pixel(1, 1);
        assert!(p[0] > 64 && p[1] > 128);
        assert_eq!(p[2], 255);
    }

    #[test]
    fn test_zero_gamma_saturates() {
        let lut = build_gamma_lut(0.0).unwrap();
        assert_eq!(lut[0], 0);
        assert_eq!(lut[254], 0);
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn test_negative_gamma_is_rejected() {
        let img = RgbImage::new(1, 1);
        assert!(matches!(
            gamma_correction(&img, -1.0),
            Err(UtilError::InvalidParams(_))
        ));
        assert!(build_gamma_lut(f64::NAN).is_err());
        assert!(build_gamma_lut(f64::INFINITY).is_err());
        assert!(build_gamma_lut(f64::NEG_INFINITY).is_err());
    }
}
