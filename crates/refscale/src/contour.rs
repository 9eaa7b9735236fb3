//! External contours of binary masks.
//!
//! Contours stay on the integer pixel grid that `imageproc` traces them on;
//! perimeter, polygon simplification and hulls come from
//! [`imageproc::geometry`].

use crate::error::{MeasureError, Stage};
use crate::segment::{foreground_fraction, mask_is_degenerate};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, arc_length, convex_hull};
use imageproc::point::Point;
use nalgebra::Point2;
use refscale_core::{area, signed_area};

/// Distance from a traced contour to the region's true edge, in pixels.
///
/// Contours run through the centres of the outermost foreground pixels, half
/// a pixel inside the edge of the pixels themselves.
pub const CONTOUR_INSET_PX: f64 = 0.5;

/// Outer border of one connected foreground region, in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
}

impl Contour {
    /// Closed-curve length.
    pub fn perimeter(&self) -> f64 {
        arc_length(&self.points, true)
    }

    /// Shoelace area of the border polygon.
    pub fn area(&self) -> f64 {
        area(&to_point2(&self.points))
    }

    /// Douglas-Peucker simplification of the closed border; a non-positive
    /// tolerance keeps every point.
    pub fn simplified(&self, epsilon: f64) -> Vec<Point<i32>> {
        if epsilon.is_nan() || epsilon <= 0.0 || self.points.len() < 3 {
            return self.points.clone();
        }
        let mut poly = approximate_polygon_dp(&self.points, epsilon, true);
        if poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        poly
    }

    /// Convex hull of the border.
    pub fn hull(&self) -> Vec<Point2<f64>> {
        hull_of(&self.points)
    }
}

pub fn to_point2(points: &[Point<i32>]) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| Point2::new(f64::from(p.x), f64::from(p.y)))
        .collect()
}

/// Convex hull of integer points, as floating-point vertices wound
/// clockwise on screen (positive signed area).
pub fn hull_of(points: &[Point<i32>]) -> Vec<Point2<f64>> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut hull = to_point2(&convex_hull(points));
    if signed_area(&hull) < 0.0 {
        hull.reverse();
    }
    hull
}

/// Outer borders of top-level foreground regions; holes and anything nested
/// inside another region are ignored.
pub fn external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Contour { points: c.points })
        .collect()
}

/// Reject an all-foreground or all-background mask.
pub fn check_mask(mask: &GrayImage, stage: Stage) -> Result<(), MeasureError> {
    if mask_is_degenerate(mask) {
        return Err(MeasureError::SegmentationDegenerate {
            stage,
            foreground_fraction: foreground_fraction(mask),
        });
    }
    Ok(())
}

/// Contour with the longest closed perimeter; the first one wins ties.
pub fn max_perimeter(contours: &[Contour]) -> Option<&Contour> {
    contours.iter().fold(None, |best: Option<&Contour>, c| match best {
        Some(b) if b.perimeter() >= c.perimeter() => Some(b),
        _ => Some(c),
    })
}
