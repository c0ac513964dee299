//! Pixel-exact fidelity checks between canonical rasters.
//!
//! The maximum absolute sample error is computed in `i32`, so neither 8-bit
//! nor 16-bit samples can wrap. No floating point is involved in the
//! pass/fail decision.

use rayon::prelude::*;
use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::CanonicalImage;

/// Bound a reconstruction is checked against for a given `near`.
///
/// Both bounds appear in practice; a run picks one explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceBound {
    /// Allowed error is exactly `near`.
    #[default]
    Exact,
    /// Allowed error is `near + 1`.
    Relaxed,
}

impl ToleranceBound {
    /// Largest admissible absolute error for `near`.
    #[must_use]
    pub fn allowed(&self, near: u32) -> u32 {
        match self {
            Self::Exact => near,
            Self::Relaxed => near.saturating_add(1),
        }
    }
}

/// Maximum absolute difference between two equally sized sample slices.
///
/// Returns 0 for empty input. Callers compare shapes first.
pub(crate) fn max_abs_diff<T>(a: &[T], b: &[T]) -> u32
where
    T: Copy + Into<i32> + Sync,
{
    debug_assert_eq!(a.len(), b.len());
    a.par_iter()
        .zip(b.par_iter())
        .map(|(&x, &y)| {
            let (x, y): (i32, i32) = (x.into(), y.into());
            (x - y).unsigned_abs()
        })
        .max()
        .unwrap_or(0)
}

fn max_abs_diff_rgb(a: &[RGB8], b: &[RGB8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    a.par_iter()
        .zip(b.par_iter())
        .map(|(p, q)| {
            let dr = (i32::from(p.r) - i32::from(q.r)).unsigned_abs();
            let dg = (i32::from(p.g) - i32::from(q.g)).unsigned_abs();
            let db = (i32::from(p.b) - i32::from(q.b)).unsigned_abs();
            dr.max(dg).max(db)
        })
        .max()
        .unwrap_or(0)
}

/// Largest absolute sample difference over all pixels and channels.
///
/// Fails with [`Error::ShapeMismatch`] when width, height or channel mode
/// differ, regardless of sample content.
pub fn max_abs_error(reference: &CanonicalImage, test: &CanonicalImage) -> Result<u32> {
    let (expected, actual) = (reference.shape(), test.shape());
    if expected != actual {
        return Err(Error::ShapeMismatch { expected, actual });
    }

    Ok(match (reference, test) {
        (CanonicalImage::Gray(a), CanonicalImage::Gray(b)) => {
            let a: Vec<u8> = a.pixels().collect();
            let b: Vec<u8> = b.pixels().collect();
            max_abs_diff(&a, &b)
        }
        (CanonicalImage::Rgb(a), CanonicalImage::Rgb(b)) => {
            let a: Vec<RGB8> = a.pixels().collect();
            let b: Vec<RGB8> = b.pixels().collect();
            max_abs_diff_rgb(&a, &b)
        }
        _ => return Err(Error::ShapeMismatch { expected, actual }),
    })
}

/// Verify that `test` reconstructs `reference` within the bound for `near`.
///
/// Returns the observed maximum absolute error on success.
pub fn check(
    reference: &CanonicalImage,
    test: &CanonicalImage,
    near: u32,
    bound: ToleranceBound,
) -> Result<u32> {
    let max_error = max_abs_error(reference, test)?;
    let allowed = bound.allowed(near);
    if max_error > allowed {
        return Err(Error::ToleranceExceeded {
            max_error,
            allowed,
            near,
        });
    }
    Ok(max_error)
}

/// Peak signal-to-noise ratio in dB over all samples.
///
/// Returns `None` for identical rasters (infinite PSNR) and for mismatched
/// shapes.
#[must_use]
pub fn psnr(reference: &CanonicalImage, test: &CanonicalImage) -> Option<f64> {
    if reference.shape() != test.shape() {
        return None;
    }

    let a = reference.to_samples();
    let b = test.to_samples();
    if a.is_empty() {
        return None;
    }

    let sse: u64 = a
        .par_iter()
        .zip(b.par_iter())
        .map(|(&x, &y)| {
            let d = i64::from(x) - i64::from(y);
            (d * d) as u64
        })
        .sum();

    if sse == 0 {
        None
    } else {
        let mse = sse as f64 / a.len() as f64;
        Some(10.0 * (255.0_f64 * 255.0 / mse).log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ChannelMode;
    use imgref::ImgVec;

    fn gray(width: usize, height: usize, fill: u8) -> CanonicalImage {
        CanonicalImage::Gray(ImgVec::new(vec![fill; width * height], width, height))
    }

    #[test]
    fn test_all_zero_identical() {
        let a = gray(16, 16, 0);
        let b = gray(16, 16, 0);
        assert_eq!(check(&a, &b, 0, ToleranceBound::Exact).unwrap(), 0);
        assert_eq!(psnr(&a, &b), None);
    }

    #[test]
    fn test_height_mismatch_is_shape_error() {
        let a = gray(10, 10, 7);
        let b = gray(10, 12, 7);
        let err = max_abs_error(&a, &b).unwrap_err();
        match err {
            Error::ShapeMismatch { expected, actual } => {
                assert_eq!(expected.height, 10);
                assert_eq!(actual.height, 12);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_checked_before_tolerance() {
        // Content would blow any tolerance, but the shape error wins.
        let a = gray(10, 10, 0);
        let b = gray(12, 10, 255);
        let err = check(&a, &b, 0, ToleranceBound::Relaxed).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_mode_mismatch_is_shape_error() {
        let a = gray(2, 2, 0);
        let b = CanonicalImage::Rgb(ImgVec::new(vec![RGB8::new(0, 0, 0); 4], 2, 2));
        match max_abs_error(&a, &b).unwrap_err() {
            Error::ShapeMismatch { expected, actual } => {
                assert_eq!(expected.mode, ChannelMode::Gray);
                assert_eq!(actual.mode, ChannelMode::Rgb);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_no_wraparound() {
        let a = gray(3, 1, 0);
        let b = gray(3, 1, 255);
        assert_eq!(max_abs_error(&a, &b).unwrap(), 255);
        assert_eq!(max_abs_error(&b, &a).unwrap(), 255);
    }

    #[test]
    fn test_exact_and_relaxed_bounds() {
        let a = gray(4, 4, 100);
        let mut samples = vec![100u8; 16];
        samples[5] = 103;
        let b = CanonicalImage::Gray(ImgVec::new(samples, 4, 4));

        assert_eq!(check(&a, &b, 3, ToleranceBound::Exact).unwrap(), 3);
        assert!(matches!(
            check(&a, &b, 2, ToleranceBound::Exact),
            Err(Error::ToleranceExceeded {
                max_error: 3,
                allowed: 2,
                near: 2
            })
        ));
        assert_eq!(check(&a, &b, 2, ToleranceBound::Relaxed).unwrap(), 3);
    }

    #[test]
    fn test_max_abs_diff_wide_samples() {
        assert_eq!(max_abs_diff(&[0u8, 255, 10], &[255u8, 0, 12]), 255);
        assert_eq!(max_abs_diff(&[0u16, 65535], &[65535u16, 65535]), 65535);
        assert_eq!(max_abs_diff::<u8>(&[], &[]), 0);
    }

    #[test]
    fn test_rgb_takes_max_over_channels() {
        let a = CanonicalImage::Rgb(ImgVec::new(vec![RGB8::new(10, 10, 10); 4], 2, 2));
        let mut px = vec![RGB8::new(10, 10, 10); 4];
        px[3] = RGB8::new(11, 10, 4);
        let b = CanonicalImage::Rgb(ImgVec::new(px, 2, 2));
        assert_eq!(max_abs_error(&a, &b).unwrap(), 6);
    }

    #[test]
    fn test_psnr_single_step() {
        let a = gray(10, 10, 128);
        let b = gray(10, 10, 129);
        let value = psnr(&a, &b).unwrap();
        assert!((value - 48.13).abs() < 0.01);
    }
}
