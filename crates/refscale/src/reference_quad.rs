//! Locate the four corners of the reference sheet.

use crate::contour::{check_mask, external_contours, max_perimeter, to_point2};
use crate::error::{MeasureError, Stage};
use image::GrayImage;
use nalgebra::Point2;
use refscale_core::Quad;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadDetectorParams {
    /// Smallest polygon tolerance tried, as a fraction of the contour perimeter.
    pub epsilon_min: f64,
    /// Largest polygon tolerance tried.
    pub epsilon_max: f64,
    pub epsilon_step: f64,
    /// Minimum quad area as a fraction of the image area.
    pub min_area_fraction: f64,
}

impl Default for QuadDetectorParams {
    fn default() -> Self {
        Self {
            epsilon_min: 0.005,
            epsilon_max: 0.10,
            epsilon_step: 0.005,
            min_area_fraction: 0.01,
        }
    }
}

impl QuadDetectorParams {
    fn tolerances(&self) -> impl Iterator<Item = f64> + '_ {
        let step = self.epsilon_step.max(1e-4);
        let steps = ((self.epsilon_max - self.epsilon_min) / step + 1e-9).floor().max(0.0) as usize;
        (0..=steps).map(move |i| self.epsilon_min + step * i as f64)
    }
}

/// Find the reference quad in a segmented mask.
///
/// The longest external contour is simplified with increasing tolerance
/// until exactly four vertices remain. The corners come back as TL, TR, BR,
/// BL and are validated for area, convexity and winding.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(mask, params), fields(w = mask.width(), h = mask.height())))]
pub fn detect_reference_quad(
    mask: &GrayImage,
    params: &QuadDetectorParams,
) -> Result<Quad, MeasureError> {
    check_mask(mask, Stage::Segmentation)?;
    let contours = external_contours(mask);
    let Some(outline) = max_perimeter(&contours) else {
        return Err(MeasureError::ReferenceQuadNotFound { contours: 0 });
    };
    let perimeter = outline.perimeter();

    let corners = params.tolerances().find_map(|eps| {
        let poly = outline.simplified(eps * perimeter);
        log::trace!("quad: eps {:.3} -> {} vertices", eps, poly.len());
        <[Point2<f64>; 4]>::try_from(to_point2(&poly)).ok()
    });
    let Some(corners) = corners else {
        log::debug!(
            "quad: longest of {} contours (perimeter {:.1}) never simplified to 4 vertices",
            contours.len(),
            perimeter
        );
        return Err(MeasureError::ReferenceQuadNotFound {
            contours: contours.len(),
        });
    };

    let quad = Quad::from_unordered(corners);
    let image_area = f64::from(mask.width()) * f64::from(mask.height());
    quad.validate(params.min_area_fraction * image_area)?;
    log::debug!("quad: corners {:?}", quad.corners);
    Ok(quad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn fill_polygon(w: u32, h: u32, poly: &[Point2<f64>]) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let p = Point2::new(f64::from(x), f64::from(y));
            let inside = (0..poly.len()).all(|i| {
                let a = poly[i];
                let b = poly[(i + 1) % poly.len()];
                (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x) >= 0.0
            });
            Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn skewed_sheet_yields_ordered_corners() {
        let truth = [
            Point2::new(40.0, 30.0),
            Point2::new(160.0, 45.0),
            Point2::new(150.0, 190.0),
            Point2::new(30.0, 170.0),
        ];
        let mask = fill_polygon(200, 220, &truth);
        let quad = detect_reference_quad(&mask, &QuadDetectorParams::default()).expect("quad");
        for (c, t) in quad.corners.iter().zip(truth.iter()) {
            assert!((c - t).norm() < 2.5, "{c:?} vs {t:?}");
        }
        assert!(quad.signed_area() > 0.0);
    }

    #[test]
    fn circle_is_not_a_quad() {
        let mask = GrayImage::from_fn(120, 120, |x, y| {
            let (dx, dy) = (f64::from(x) - 60.0, f64::from(y) - 60.0);
            Luma([if dx * dx + dy * dy < 45.0 * 45.0 { 255 } else { 0 }])
        });
        let params = QuadDetectorParams {
            epsilon_max: 0.03,
            ..QuadDetectorParams::default()
        };
        let err = detect_reference_quad(&mask, &params).expect_err("circle");
        assert!(matches!(err, MeasureError::ReferenceQuadNotFound { contours: 1 }));
    }

    #[test]
    fn tiny_quad_is_degenerate() {
        let mask = GrayImage::from_fn(200, 200, |x, y| {
            Luma([if (10..15).contains(&x) && (10..15).contains(&y) { 255 } else { 0 }])
        });
        let err = detect_reference_quad(&mask, &QuadDetectorParams::default()).expect_err("tiny");
        assert_eq!(err.code(), "degenerate_quad");
    }

    #[test]
    fn blank_mask_is_segmentation_failure() {
        let err = detect_reference_quad(&GrayImage::new(50, 50), &QuadDetectorParams::default())
            .expect_err("blank");
        assert_eq!(err.code(), "segmentation_degenerate");
    }

    #[test]
    fn tolerance_schedule_is_inclusive() {
        let eps: Vec<f64> = QuadDetectorParams::default().tolerances().collect();
        assert_eq!(eps.len(), 20);
        assert!((eps[0] - 0.005).abs() < 1e-12);
        assert!((eps[19] - 0.10).abs() < 1e-9);
    }
}
