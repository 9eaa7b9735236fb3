//! Checkerboard inner corners from the ChESS detector in `chess-corners`.

use crate::params::CornerDetectorParams;
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use image::GrayImage;
use nalgebra::Point2;
use std::f64::consts::PI;

/// A detected checkerboard corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct XCorner {
    /// Sub-pixel position in image pixels.
    pub position: Point2<f64>,
    /// ChESS orientation, in `[0, pi)`. Grid neighbours sit at 45 degrees
    /// to it and carry the orthogonal orientation.
    pub orientation: f64,
    /// ChESS response.
    pub strength: f64,
}

/// `chess-corners` configuration for the given detector settings.
pub fn chess_config(params: &CornerDetectorParams) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = params.threshold_rel;
    cfg.params.nms_radius = params.nms_radius;
    cfg
}

fn adapt_chess_corner(c: &CornerDescriptor) -> XCorner {
    XCorner {
        position: Point2::new(f64::from(c.x), f64::from(c.y)),
        orientation: f64::from(c.orientation).rem_euclid(PI),
        strength: f64::from(c.response),
    }
}

/// Detect checkerboard inner corners in a grayscale image, strongest first.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(img, params), fields(w = img.width(), h = img.height()))
)]
pub fn detect_corners(img: &GrayImage, params: &CornerDetectorParams) -> Vec<XCorner> {
    if img.width() < params.min_image_side || img.height() < params.min_image_side {
        return Vec::new();
    }
    let mut corners: Vec<XCorner> = find_chess_corners_image(img, &chess_config(params))
        .iter()
        .map(adapt_chess_corner)
        .collect();
    corners.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    log::debug!("corner detector: {} corners", corners.len());
    corners
}
