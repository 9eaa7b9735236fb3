//! Perspective rectification onto a canvas of known physical size.

use crate::config::SheetSpec;
use crate::error::{MeasureError, Stage};
use image::RgbImage;
use nalgebra::Point2;
use refscale_core::{homography_from_4pt, warp_perspective, Homography, Quad};

/// Top-down view of the reference sheet.
#[derive(Clone, Debug)]
pub struct RectifiedImage {
    pub image: RgbImage,
    /// Maps source image pixels onto canvas pixels.
    pub canvas_from_image: Homography,
    /// Canvas pixels per millimetre, uniform in both directions.
    pub px_per_mm: f64,
    pub quad: Quad,
    /// Physical sheet size, already swapped for a landscape sheet. The
    /// canvas may show a slightly smaller inner part of it.
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Canvas size in millimetres for a detected quad.
///
/// A quad whose top and bottom edges are longer than its sides is a
/// landscape sheet, so the short side of the sheet becomes the height.
pub fn canvas_size_mm(quad: &Quad, sheet: &SheetSpec) -> (f64, f64) {
    let (short, long) = if sheet.width_mm <= sheet.height_mm {
        (sheet.width_mm, sheet.height_mm)
    } else {
        (sheet.height_mm, sheet.width_mm)
    };
    if quad.mean_horizontal_edge() > quad.mean_vertical_edge() {
        (long, short)
    } else {
        (short, long)
    }
}

/// Warp `img` so that `quad` fills an axis-aligned canvas of the sheet's
/// physical aspect ratio at `sheet.px_per_mm`.
///
/// Canvas corners are `(0,0) (W,0) (W,H) (0,H)`; canvas pixels whose source
/// falls outside the image are black.
pub fn rectify(img: &RgbImage, quad: &Quad, sheet: &SheetSpec) -> Result<RectifiedImage, MeasureError> {
    rectify_inset(img, quad, sheet, 0.0)
}

/// [`rectify`] for a quad found `inset_px` image pixels inside the true
/// sheet edge, as a quad traced on an eroded mask is.
///
/// Such a quad covers `edge / (edge + 2 inset)` of each sheet side. The
/// canvas shows just that part of the sheet, still at `sheet.px_per_mm`, so
/// distances on it stay true to scale and its border stays on the sheet.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(img, quad), fields(w = img.width(), h = img.height())))]
pub fn rectify_inset(
    img: &RgbImage,
    quad: &Quad,
    sheet: &SheetSpec,
    inset_px: f64,
) -> Result<RectifiedImage, MeasureError> {
    let (width_mm, height_mm) = canvas_size_mm(quad, sheet);
    let inset = inset_px.max(0.0);
    let (h_edge, v_edge) = (quad.mean_horizontal_edge(), quad.mean_vertical_edge());
    let covered_w = width_mm * h_edge / (h_edge + 2.0 * inset);
    let covered_h = height_mm * v_edge / (v_edge + 2.0 * inset);

    let (x1, y1) = (covered_w * sheet.px_per_mm, covered_h * sheet.px_per_mm);
    let (w, h) = (x1.round(), y1.round());
    if !(w >= 1.0 && h >= 1.0 && w <= f64::from(u32::MAX) && h <= f64::from(u32::MAX)) {
        return Err(MeasureError::InvalidConfig {
            reason: format!("canvas {w} x {h} px is not representable"),
        });
    }
    let dst = [
        Point2::new(0.0, 0.0),
        Point2::new(x1, 0.0),
        Point2::new(x1, y1),
        Point2::new(0.0, y1),
    ];
    let canvas_from_image = homography_from_4pt(&quad.corners, &dst).ok_or_else(|| {
        MeasureError::ObjectNotFound {
            stage: Stage::Rectification,
            reason: "reference quad does not define a homography".to_string(),
        }
    })?;
    let image_from_canvas = canvas_from_image.inverse().ok_or_else(|| MeasureError::ObjectNotFound {
        stage: Stage::Rectification,
        reason: "rectifying homography is singular".to_string(),
    })?;

    let image = warp_perspective(img, &image_from_canvas, w as u32, h as u32);
    log::debug!(
        "rectify: {:.0} x {:.0} mm sheet, {} px/mm canvas of {} x {} px, quad inset {:.1} px",
        width_mm,
        height_mm,
        sheet.px_per_mm,
        image.width(),
        image.height(),
        inset
    );
    Ok(RectifiedImage {
        image,
        canvas_from_image,
        px_per_mm: sheet.px_per_mm,
        quad: *quad,
        width_mm,
        height_mm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn quad(corners: [(f64, f64); 4]) -> Quad {
        Quad::new(corners.map(|(x, y)| Point2::new(x, y)))
    }

    #[test]
    fn portrait_and_landscape_follow_the_quad() {
        let portrait = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 140.0), (0.0, 140.0)]);
        assert_eq!(canvas_size_mm(&portrait, &SheetSpec::A4), (210.0, 297.0));
        let landscape = quad([(0.0, 0.0), (140.0, 0.0), (140.0, 100.0), (0.0, 100.0)]);
        assert_eq!(canvas_size_mm(&landscape, &SheetSpec::A4), (297.0, 210.0));
    }

    #[test]
    fn corners_land_on_the_canvas_corners() {
        let q = quad([(30.0, 20.0), (170.0, 35.0), (160.0, 230.0), (20.0, 210.0)]);
        let img = RgbImage::from_pixel(200, 250, Rgb([200, 200, 200]));
        let sheet = SheetSpec::A4.with_scale(0.5);
        let r = rectify(&img, &q, &sheet).expect("rectify");
        assert_eq!(r.image.dimensions(), (105, 149));
        let expected = [(0.0, 0.0), (105.0, 0.0), (105.0, 148.5), (0.0, 148.5)];
        for (c, (ex, ey)) in q.corners.iter().zip(expected) {
            let p = r.canvas_from_image.apply(*c);
            assert!((p.x - ex).abs() < 1e-6 && (p.y - ey).abs() < 1e-6, "{p:?}");
        }
        // interior of the quad is the uniform source colour
        assert_eq!(r.image.get_pixel(50, 70).0, [200, 200, 200]);
    }

    #[test]
    fn inverse_maps_canvas_corners_back_onto_the_quad() {
        let q = quad([(12.5, 8.0), (301.0, 40.0), (280.0, 410.0), (5.0, 390.0)]);
        let r = rectify(&RgbImage::new(320, 420), &q, &SheetSpec::A4.with_scale(1.0)).expect("rectify");
        let back = r.canvas_from_image.inverse().expect("invertible");
        let (w, h) = (210.0, 297.0);
        let canvas = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];
        for (c, src) in canvas.iter().zip(q.corners.iter()) {
            assert!((back.apply(*c) - src).norm() < 1e-6);
        }
    }

    #[test]
    fn inset_quad_keeps_the_canvas_true_to_scale() {
        // 2 px/mm sheet at (20, 20) whose quad was traced 2.5 px inside
        let inset = 2.5;
        let q = quad([
            (20.0 + inset, 20.0 + inset),
            (440.0 - inset, 20.0 + inset),
            (440.0 - inset, 614.0 - inset),
            (20.0 + inset, 614.0 - inset),
        ]);
        let sheet = SheetSpec::A4.with_scale(1.0);
        let img = RgbImage::new(460, 640);
        let r = rectify_inset(&img, &q, &sheet, inset).expect("rectify");
        assert_eq!(r.image.dimensions(), (208, 295));
        assert_eq!((r.width_mm, r.height_mm), (210.0, 297.0));

        // the quad fills the canvas and the true corners sit just outside it
        let tl = r.canvas_from_image.apply(Point2::new(20.0, 20.0));
        let br = r.canvas_from_image.apply(Point2::new(440.0, 614.0));
        assert!((tl - Point2::new(-1.25, -1.25)).norm() < 1e-6, "{tl:?}");
        assert!((br - tl - nalgebra::Vector2::new(210.0, 297.0)).norm() < 1e-6, "{br:?}");

        // without the inset the traced quad is stretched over the canvas
        let plain = rectify(&img, &q, &sheet).expect("rectify");
        let span = plain.canvas_from_image.apply(Point2::new(440.0, 20.0)).x
            - plain.canvas_from_image.apply(Point2::new(20.0, 20.0)).x;
        assert!(span > 212.0, "span {span}");
    }
}
