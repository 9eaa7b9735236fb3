use crate::contour::CONTOUR_INSET_PX;
use nalgebra::Point2;
use refscale_core::{min_area_rect, OrientedBoundingBox};

/// Minimum-area oriented box around `outline` with the longer side first.
///
/// Works on raw contours, simplified polygons and hulls alike. `None` only
/// for an empty outline.
pub fn extract_dimensions(outline: &[Point2<f64>]) -> Option<OrientedBoundingBox> {
    min_area_rect(outline).map(|b| b.canonical())
}

/// Box covering the pixels of a region whose traced contour is `outline`.
///
/// [`extract_dimensions`] grown by [`CONTOUR_INSET_PX`] on every side, so a
/// `w x h` block of pixels measures `w x h`.
pub fn pixel_footprint(outline: &[Point2<f64>]) -> Option<OrientedBoundingBox> {
    extract_dimensions(outline).map(|b| b.grown(CONTOUR_INSET_PX))
}
