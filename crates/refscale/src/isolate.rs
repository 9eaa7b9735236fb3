//! Isolate the single object lying on the rectified sheet.
//!
//! Hue is unreliable under the lighting this targets, so it is zeroed and
//! only saturation and value take part in an adaptive threshold. The
//! binarised colour image is turned back into intensity and an inverted
//! fixed threshold leaves the object as foreground.

use crate::contour::{external_contours, hull_of, max_perimeter};
use crate::error::{MeasureError, Stage};
use crate::segment::{foreground_fraction, mask_is_degenerate};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatorParams {
    /// Gaussian sigma on the (0, S, V) image; `<= 0` disables the blur.
    pub blur_sigma: f32,
    /// Luma above this is background after the colour round trip.
    pub gray_threshold: u8,
    /// Polygon tolerance as a fraction of the selected contour's perimeter.
    pub polygon_tolerance: f64,
    /// 3x3 dilations applied to the object mask. The blurred edge crosses
    /// the binarisation level about a pixel inside the object.
    pub edge_dilation: u8,
}

impl Default for IsolatorParams {
    fn default() -> Self {
        Self {
            blur_sigma: 0.8,
            gray_threshold: 220,
            polygon_tolerance: 0.005,
            edge_dilation: 1,
        }
    }
}

/// Object outline on the rectified canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct IsolatedObject {
    /// Convex hull of the simplified outline, clockwise on screen.
    pub hull: Vec<Point2<f64>>,
    /// Perimeter of the raw contour the hull was built from.
    pub contour_perimeter: f64,
}

/// HSV with the hue channel zeroed, stored as `(0, S, V)` in 8-bit channels.
pub fn saturation_value(img: &RgbImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let s = if v == 0 {
            0
        } else {
            ((255.0 * f64::from(v - min) / f64::from(v)).round()) as u8
        };
        Rgb([0, s, v])
    })
}

/// Back to RGB for a hue of zero: `r = v`, `g = b = v * (1 - s)`.
fn zero_hue_to_rgb(hsv: Rgb<u8>) -> Rgb<u8> {
    let [_, s, v] = hsv.0;
    let chroma = (f64::from(v) * f64::from(s) / 255.0).round() as u8;
    let rest = v.saturating_sub(chroma);
    Rgb([v, rest, rest])
}

/// Binary object mask (object 255) for a rectified sheet.
pub fn object_mask(rectified: &RgbImage, params: &IsolatorParams) -> GrayImage {
    let mut sv = saturation_value(rectified);
    if params.blur_sigma > 0.0 {
        sv = gaussian_blur_f32(&sv, params.blur_sigma);
    }

    let raw = sv.as_raw();
    let mean = if raw.is_empty() {
        0.0
    } else {
        raw.iter().map(|&v| f64::from(v)).sum::<f64>() / raw.len() as f64
    };
    let level = mean / 2.0;
    log::debug!("isolate: adaptive level {level:.1}");

    GrayImage::from_fn(sv.width(), sv.height(), |x, y| {
        let bin = sv
            .get_pixel(x, y)
            .0
            .map(|c| if f64::from(c) > level { 255 } else { 0 });
        let [r, g, b] = zero_hue_to_rgb(Rgb(bin)).0;
        let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
        Luma([if luma > u32::from(params.gray_threshold) { 0 } else { 255 }])
    })
}

/// Convex outline of the dominant object on a rectified sheet.
///
/// The contour with the longest perimeter wins, not the largest area, so
/// thin objects are not lost to compact blobs.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(rectified, params), fields(w = rectified.width(), h = rectified.height())))]
pub fn isolate_object(rectified: &RgbImage, params: &IsolatorParams) -> Result<IsolatedObject, MeasureError> {
    let mask = object_mask(rectified, params);
    if mask_is_degenerate(&mask) {
        let fraction = foreground_fraction(&mask);
        return Err(if fraction == 0.0 {
            MeasureError::ObjectNotFound {
                stage: Stage::Isolation,
                reason: "nothing stands out from the sheet".to_string(),
            }
        } else {
            MeasureError::SegmentationDegenerate {
                stage: Stage::Isolation,
                foreground_fraction: fraction,
            }
        });
    }

    let mask = if params.edge_dilation > 0 {
        dilate(&mask, Norm::LInf, params.edge_dilation)
    } else {
        mask
    };

    let contours = external_contours(&mask);
    let outline = max_perimeter(&contours).ok_or_else(|| MeasureError::ObjectNotFound {
        stage: Stage::Isolation,
        reason: "no external contour".to_string(),
    })?;
    let contour_perimeter = outline.perimeter();
    let poly = outline.simplified(params.polygon_tolerance * contour_perimeter);
    let hull = hull_of(&poly);
    if hull.len() < 3 {
        return Err(MeasureError::ObjectNotFound {
            stage: Stage::Isolation,
            reason: format!("outline collapses to {} vertices", hull.len()),
        });
    }
    log::debug!(
        "isolate: {} contours, longest {:.1} px, hull of {} vertices",
        contours.len(),
        contour_perimeter,
        hull.len()
    );
    Ok(IsolatedObject {
        hull,
        contour_perimeter,
    })
}
