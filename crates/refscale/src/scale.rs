//! Pixel-to-millimetre conversion.
//!
//! Two strategies: the rectified canvas has a known, uniform scale, or a
//! reference object of known size is picked out of the scene contours and
//! the object of interest is measured against it.

use crate::contour::{check_mask, external_contours, Contour};
use crate::dimensions::pixel_footprint;
use crate::error::{MeasureError, Stage};
use crate::segment::{
    blur, luma, mask_is_degenerate, segment_gray, Polarity, SegmentationParams, ThresholdPolicy,
};
use image::{GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use nalgebra::Point2;
use refscale_core::OrientedBoundingBox;
use serde::{Deserialize, Serialize};

/// Where reference candidates come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// The contours of the scene segmentation.
    #[default]
    Single,
    /// Contours of several binarisations pooled together: Otsu of both
    /// polarities, a Gaussian adaptive threshold and two Canny passes.
    /// Finds low-contrast references the scene segmentation merges into the
    /// background; the object still comes from the scene segmentation.
    Pooled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceObjectParams {
    /// Scene segmentation; Otsu with automatic polarity by default.
    pub segmentation: SegmentationParams,
    pub candidates: CandidateSource,
    /// Contours must be strictly larger than this, in px^2.
    pub min_area: f64,
    /// Contours must be strictly smaller than this fraction of the image area.
    pub max_area_fraction: f64,
    /// Contours whose area is within this relative distance of the
    /// reference's are never taken as the object.
    pub exclusion_threshold: f64,
    /// Empirical bias correction; measured sizes are divided by it.
    /// Tune against ground truth for a given setup, 1.0 disables it.
    pub correction_factor: f64,
}

impl Default for ReferenceObjectParams {
    fn default() -> Self {
        Self {
            segmentation: SegmentationParams::reference_object(),
            candidates: CandidateSource::Single,
            min_area: 50.0,
            max_area_fraction: 0.9,
            exclusion_threshold: 0.2,
            correction_factor: 2.75,
        }
    }
}

impl ReferenceObjectParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.correction_factor.is_finite() && self.correction_factor > 0.0) {
            return Err(format!(
                "correction factor must be positive, got {}",
                self.correction_factor
            ));
        }
        if !(0.0..=1.0).contains(&self.exclusion_threshold) {
            return Err(format!(
                "exclusion threshold must lie in [0, 1], got {}",
                self.exclusion_threshold
            ));
        }
        if !(self.min_area >= 0.0 && self.max_area_fraction > 0.0) {
            return Err("area bounds must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Strategy A: `(width, height)` in millimetres on a canvas of known scale.
pub fn scale_rectified(obb: &OrientedBoundingBox, px_per_mm: f64) -> (f64, f64) {
    let (w, h) = obb.sides();
    (w / px_per_mm, h / px_per_mm)
}

/// Pixels per millimetre from a reference box of known physical size.
///
/// Longer box side is matched to the longer physical side and the two
/// ratios are averaged.
pub fn pixels_per_mm(reference: &OrientedBoundingBox, width_mm: f64, height_mm: f64) -> f64 {
    let (long_px, short_px) = reference.sides();
    let (long_mm, short_mm) = if width_mm >= height_mm {
        (width_mm, height_mm)
    } else {
        (height_mm, width_mm)
    };
    0.5 * (long_px / long_mm + short_px / short_mm)
}

/// Relative area difference `|a - b| / max(a, b)`; zero for two empty areas.
pub fn relative_area_difference(a: f64, b: f64) -> f64 {
    let larger = a.max(b);
    if larger <= 0.0 {
        0.0
    } else {
        (a - b).abs() / larger
    }
}

/// Strategy B result, in the frame of the measured image.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceObjectMeasurement {
    pub width_mm: f64,
    pub height_mm: f64,
    pub object_box: OrientedBoundingBox,
    pub object_hull: Vec<Point2<f64>>,
    pub reference_box: OrientedBoundingBox,
    pub px_per_mm: f64,
}

/// Index of the largest-area contour that passes `keep`.
fn largest_by_area(contours: &[Contour], keep: impl Fn(f64) -> bool) -> Option<(usize, f64)> {
    contours
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.area()))
        .filter(|&(_, a)| keep(a))
        .fold(None, |best, cur| match best {
            Some((_, a)) if a >= cur.1 => best,
            _ => Some(cur),
        })
}

/// Strategy B over a set of external contours.
///
/// The reference is the largest contour with `min_area < area < max_area`.
/// The object is the largest contour whose area differs from the
/// reference's by more than the exclusion threshold.
pub fn measure_against_reference(
    contours: &[Contour],
    image_area: f64,
    width_mm: f64,
    height_mm: f64,
    params: &ReferenceObjectParams,
) -> Result<ReferenceObjectMeasurement, MeasureError> {
    measure_with_candidates(contours, contours, image_area, width_mm, height_mm, params)
}

/// Strategy B with the reference drawn from `reference_pool` and the object
/// from `object_contours`.
pub fn measure_with_candidates(
    reference_pool: &[Contour],
    object_contours: &[Contour],
    image_area: f64,
    width_mm: f64,
    height_mm: f64,
    params: &ReferenceObjectParams,
) -> Result<ReferenceObjectMeasurement, MeasureError> {
    let max_area = params.max_area_fraction * image_area;
    let (ref_idx, ref_area) = largest_by_area(reference_pool, |a| a > params.min_area && a < max_area)
        .ok_or_else(|| MeasureError::ObjectNotFound {
            stage: Stage::Scaling,
            reason: format!(
                "no reference candidate among {} contours with {} < area < {:.0} px^2",
                reference_pool.len(),
                params.min_area,
                max_area
            ),
        })?;

    let reference_box = pixel_footprint(&reference_pool[ref_idx].hull()).ok_or_else(|| {
        MeasureError::ObjectNotFound {
            stage: Stage::Scaling,
            reason: "reference contour is empty".to_string(),
        }
    })?;
    let px_per_mm = pixels_per_mm(&reference_box, width_mm, height_mm);
    if !(px_per_mm.is_finite() && px_per_mm > 0.0) {
        return Err(MeasureError::ObjectNotFound {
            stage: Stage::Scaling,
            reason: format!("reference yields a scale of {px_per_mm} px/mm"),
        });
    }
    log::debug!(
        "scale: reference #{ref_idx} area {ref_area:.0} px^2, box {:.1} x {:.1} px, {px_per_mm:.3} px/mm",
        reference_box.width,
        reference_box.height
    );

    let (obj_idx, obj_area) = largest_by_area(object_contours, |a| {
        relative_area_difference(a, ref_area) > params.exclusion_threshold
    })
    .ok_or_else(|| MeasureError::ObjectNotFound {
        stage: Stage::Scaling,
        reason: "no contour besides the reference".to_string(),
    })?;

    let object_hull = object_contours[obj_idx].hull();
    let object_box = pixel_footprint(&object_hull).ok_or_else(|| MeasureError::ObjectNotFound {
        stage: Stage::Scaling,
        reason: "object contour is empty".to_string(),
    })?;
    let scale = px_per_mm * params.correction_factor;
    let width_mm = object_box.width / scale;
    let height_mm = object_box.height / scale;
    log::debug!("scale: object #{obj_idx} area {obj_area:.0} px^2 -> {width_mm:.1} x {height_mm:.1} mm");

    Ok(ReferenceObjectMeasurement {
        width_mm,
        height_mm,
        object_box,
        object_hull,
        reference_box,
        px_per_mm,
    })
}

/// Strategy B end to end: segment the scene, then measure against the
/// reference object.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(img, params), fields(w = img.width(), h = img.height())))]
pub fn measure_with_reference_object(
    img: &RgbImage,
    width_mm: f64,
    height_mm: f64,
    params: &ReferenceObjectParams,
) -> Result<ReferenceObjectMeasurement, MeasureError> {
    let gray = luma(img);
    let mask = segment_gray(&gray, &params.segmentation);
    check_mask(&mask, Stage::Segmentation)?;
    let contours = external_contours(&mask);
    let image_area = f64::from(img.width()) * f64::from(img.height());
    match params.candidates {
        CandidateSource::Single => {
            measure_against_reference(&contours, image_area, width_mm, height_mm, params)
        }
        CandidateSource::Pooled => {
            let pool = pooled_candidates(&gray, params.segmentation.blur_sigma);
            measure_with_candidates(&pool, &contours, image_area, width_mm, height_mm, params)
        }
    }
}

/// Sigma of the Gaussian window behind the adaptive threshold, the one an
/// 11 px block implies.
const ADAPTIVE_SIGMA: f32 = 2.0;
/// Offset below the local mean that still counts as foreground.
const ADAPTIVE_OFFSET: i16 = 2;
/// `(low, high)` hysteresis pairs for the two Canny passes.
const CANNY_PASSES: [(f32, f32); 2] = [(30.0, 150.0), (10.0, 100.0)];

/// Gaussian-weighted adaptive threshold: foreground where the pixel is above
/// its local mean less [`ADAPTIVE_OFFSET`].
fn adaptive_mask(gray: &GrayImage) -> GrayImage {
    let local = gaussian_blur_f32(gray, ADAPTIVE_SIGMA);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = i16::from(gray.get_pixel(x, y).0[0]);
        let m = i16::from(local.get_pixel(x, y).0[0]);
        image::Luma([if v > m - ADAPTIVE_OFFSET { 255 } else { 0 }])
    })
}

/// External contours of every pooled binarisation of `gray`.
pub fn pooled_candidates(gray: &GrayImage, blur_sigma: f32) -> Vec<Contour> {
    let blurred = blur(gray, blur_sigma);
    let otsu = |polarity| SegmentationParams {
        blur_sigma: 0.0,
        policy: ThresholdPolicy::Otsu { polarity },
    };
    let mut masks = vec![
        segment_gray(&blurred, &otsu(Polarity::BrightForeground)),
        segment_gray(&blurred, &otsu(Polarity::DarkForeground)),
        adaptive_mask(&blurred),
    ];
    // one dilation closes single-pixel gaps in the edge rings
    masks.extend(
        CANNY_PASSES
            .iter()
            .map(|&(low, high)| dilate(&canny(&blurred, low, high), Norm::LInf, 1)),
    );

    let pool: Vec<Contour> = masks
        .iter()
        .filter(|m| !mask_is_degenerate(m))
        .flat_map(external_contours)
        .collect();
    log::debug!("scale: {} pooled reference candidates from {} masks", pool.len(), masks.len());
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use imageproc::point::Point;

    /// Traced outline of a `w x h` block of pixels at `(x0, y0)`.
    fn block(x0: i32, y0: i32, w: i32, h: i32) -> Contour {
        let (x1, y1) = (x0 + w - 1, y0 + h - 1);
        Contour {
            points: vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        }
    }

    fn unit_params() -> ReferenceObjectParams {
        ReferenceObjectParams {
            correction_factor: 1.0,
            ..ReferenceObjectParams::default()
        }
    }

    #[test]
    fn scale_matches_long_side_to_long_side() {
        let obb = OrientedBoundingBox {
            center: Point2::new(0.0, 0.0),
            width: 50.0,
            height: 200.0,
            angle: 0.3,
        };
        assert_relative_eq!(pixels_per_mm(&obb, 20.0, 100.0), 2.25);
        assert_relative_eq!(pixels_per_mm(&obb, 100.0, 20.0), 2.25);
        assert_eq!(scale_rectified(&obb, 2.0), (100.0, 25.0));
    }

    #[test]
    fn object_is_measured_in_reference_units() {
        // reference 100 x 50 px standing for 50 x 25 mm
        let contours = vec![block(10, 10, 100, 50), block(200, 20, 60, 30)];
        let m = measure_against_reference(&contours, 1e6, 50.0, 25.0, &unit_params()).expect("measure");
        assert_relative_eq!(m.px_per_mm, 2.0, epsilon = 1e-9);
        assert_relative_eq!(m.width_mm, 30.0, epsilon = 1e-9);
        assert_relative_eq!(m.height_mm, 15.0, epsilon = 1e-9);
        assert_relative_eq!(m.reference_box.width, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn correction_factor_divides_the_result() {
        let contours = vec![block(10, 10, 100, 50), block(200, 20, 60, 30)];
        let m = measure_against_reference(&contours, 1e6, 50.0, 25.0, &ReferenceObjectParams::default())
            .expect("measure");
        assert_relative_eq!(m.width_mm, 30.0 / 2.75, epsilon = 1e-9);
    }

    #[test]
    fn look_alike_of_the_reference_is_never_the_object() {
        // second shape is 10% smaller than the reference: excluded
        let contours = vec![block(0, 0, 100, 100), block(200, 0, 90, 100)];
        let err = measure_against_reference(&contours, 1e6, 10.0, 10.0, &unit_params())
            .expect_err("only look-alikes");
        assert_eq!(err.code(), "object_not_found");

        // 30% smaller: it is the object
        let contours = vec![block(0, 0, 100, 100), block(200, 0, 70, 100)];
        let m = measure_against_reference(&contours, 1e6, 10.0, 10.0, &unit_params()).expect("object");
        assert_relative_eq!(m.object_box.center.x, 234.5, epsilon = 1e-9);
    }

    #[test]
    fn area_bounds_are_strict() {
        // traced area 10 x 5 equals the minimum
        let contours = vec![block(0, 0, 11, 6)];
        let err = measure_against_reference(&contours, 1e6, 10.0, 5.0, &unit_params())
            .expect_err("area equals the minimum");
        assert_eq!(err.stage(), Stage::Scaling);

        // a contour covering 95% of the image cannot be the reference
        let contours = vec![block(0, 0, 96, 101), block(0, 0, 20, 20)];
        let m = measure_against_reference(&contours, 10_000.0, 4.0, 4.0, &unit_params()).expect("measured");
        assert_relative_eq!(m.px_per_mm, 5.0, epsilon = 1e-9);
        assert_relative_eq!(m.reference_box.width, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn reference_box_covers_whole_pixels() {
        // a 40 x 20 px card at 2 px/mm is 20 x 10 mm, not 19.5 x 9.5
        let contours = vec![block(5, 5, 40, 20), block(60, 5, 30, 8)];
        let m = measure_against_reference(&contours, 1e6, 20.0, 10.0, &unit_params()).expect("measure");
        assert_relative_eq!(m.px_per_mm, 2.0, epsilon = 1e-9);
        assert_relative_eq!(m.width_mm, 15.0, epsilon = 1e-9);
        assert_relative_eq!(m.height_mm, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn relative_difference_handles_empty_areas() {
        assert_eq!(relative_area_difference(0.0, 0.0), 0.0);
        assert_relative_eq!(relative_area_difference(80.0, 100.0), 0.2);
        assert_relative_eq!(relative_area_difference(100.0, 80.0), 0.2);
    }

    /// 600 x 400 at 3 px/mm: a mid-gray 85.6 x 54 mm card and a dark
    /// 120 x 25 mm bar on a light surface.
    fn low_contrast_card_scene() -> RgbImage {
        RgbImage::from_fn(600, 400, |x, y| {
            let (xm, ym) = (f64::from(x) / 3.0, f64::from(y) / 3.0);
            let card = (10.0..95.6).contains(&xm) && (10.0..64.0).contains(&ym);
            let bar = (40.0..160.0).contains(&xm) && (90.0..115.0).contains(&ym);
            let v = if bar {
                20
            } else if card {
                140
            } else {
                210
            };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn pooled_candidates_find_a_low_contrast_reference() {
        let img = low_contrast_card_scene();

        // Otsu splits the bar off and leaves the card in the background
        let err = measure_with_reference_object(&img, 85.6, 54.0, &unit_params())
            .expect_err("card merged into the background");
        assert_eq!(err.code(), "object_not_found");

        let params = ReferenceObjectParams {
            candidates: CandidateSource::Pooled,
            ..unit_params()
        };
        let m = measure_with_reference_object(&img, 85.6, 54.0, &params).expect("pooled");
        assert_relative_eq!(m.px_per_mm, 3.0, max_relative = 0.05);
        assert_relative_eq!(m.width_mm, 120.0, max_relative = 0.05);
        assert_relative_eq!(m.height_mm, 25.0, max_relative = 0.05);
    }

    #[test]
    fn candidate_source_reads_from_config() {
        let params: ReferenceObjectParams =
            serde_json::from_str(r#"{"candidates": "pooled"}"#).expect("params");
        assert_eq!(params.candidates, CandidateSource::Pooled);
        assert_eq!(ReferenceObjectParams::default().candidates, CandidateSource::Single);
    }
}
