//! Lens undistortion with an optimal new camera matrix.

use crate::camera::{CameraIntrinsics, PinholeCamera};
use crate::CalibrationError;
use image::Pixel;
use nalgebra::{Point2, Vector2};
use refscale_core::{remap, Image8};
use serde::{Deserialize, Serialize};

/// Pixel rectangle inside an undistorted image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

const GRID: usize = 9;
const EDGE_EPS: f64 = 1e-6;

/// Outer and inner normalized rectangles `(x0, y0, x1, y1)` spanned by the
/// undistorted image border.
fn undistorted_extent(camera: &PinholeCamera, width: u32, height: u32) -> Option<([f64; 4], [f64; 4])> {
    let (w, h) = (f64::from(width.max(1) - 1), f64::from(height.max(1) - 1));
    let mut outer = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
    let mut inner = [f64::MIN, f64::MIN, f64::MAX, f64::MAX];

    for gy in 0..GRID {
        for gx in 0..GRID {
            let px = Point2::new(
                w * gx as f64 / (GRID - 1) as f64,
                h * gy as f64 / (GRID - 1) as f64,
            );
            let n = camera.unproject(px)?;
            outer = [
                outer[0].min(n.x),
                outer[1].min(n.y),
                outer[2].max(n.x),
                outer[3].max(n.y),
            ];
            if gx == 0 {
                inner[0] = inner[0].max(n.x);
            }
            if gx == GRID - 1 {
                inner[2] = inner[2].min(n.x);
            }
            if gy == 0 {
                inner[1] = inner[1].max(n.y);
            }
            if gy == GRID - 1 {
                inner[3] = inner[3].min(n.y);
            }
        }
    }

    let valid = |r: &[f64; 4]| r[2] > r[0] && r[3] > r[1];
    (valid(&outer) && valid(&inner)).then_some((outer, inner))
}

/// New intrinsics for the undistorted image and the region holding only
/// valid pixels.
///
/// `alpha = 0` zooms in until every output pixel is valid; `alpha = 1`
/// keeps every source pixel in view. The ROI covers the pixel centres that
/// fall inside the all-valid rectangle.
pub fn optimal_new_camera_matrix(
    camera: &PinholeCamera,
    width: u32,
    height: u32,
    alpha: f64,
) -> Option<(CameraIntrinsics, Roi)> {
    if width < 2 || height < 2 {
        return None;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let (outer, inner) = undistorted_extent(camera, width, height)?;
    let (w, h) = (f64::from(width - 1), f64::from(height - 1));

    let fit = |r: &[f64; 4]| {
        let fx = w / (r[2] - r[0]);
        let fy = h / (r[3] - r[1]);
        (fx, fy, -fx * r[0], -fy * r[1])
    };
    let (fx0, fy0, cx0, cy0) = fit(&inner);
    let (fx1, fy1, cx1, cy1) = fit(&outer);
    let mix = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    let new = CameraIntrinsics {
        fx: mix(fx0, fx1),
        fy: mix(fy0, fy1),
        cx: mix(cx0, cx1),
        cy: mix(cy0, cy1),
    };

    let lo = new.to_pixel(Vector2::new(inner[0], inner[1]));
    let hi = new.to_pixel(Vector2::new(inner[2], inner[3]));
    let x0 = (lo.x - EDGE_EPS).ceil().max(0.0);
    let y0 = (lo.y - EDGE_EPS).ceil().max(0.0);
    let x1 = (hi.x + EDGE_EPS).floor().min(w);
    let y1 = (hi.y + EDGE_EPS).floor().min(h);
    let roi = if x1 >= x0 && y1 >= y0 {
        Roi {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32 + 1,
            height: (y1 - y0) as u32 + 1,
        }
    } else {
        Roi {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        }
    };
    Some((new, roi))
}

/// An undistorted image together with the camera that describes it.
#[derive(Clone, Debug)]
pub struct Undistorted<P: Pixel<Subpixel = u8>> {
    pub image: Image8<P>,
    /// Intrinsics of `image`, with the principal point shifted by the crop.
    pub intrinsics: CameraIntrinsics,
    /// Crop applied, in full-frame undistorted coordinates.
    pub roi: Roi,
}

/// Remove lens distortion using the `alpha = 1` optimal camera matrix and
/// crop to the valid region when it is non-empty.
pub fn undistort_image<P>(src: &Image8<P>, camera: &PinholeCamera) -> Result<Undistorted<P>, CalibrationError>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = src.dimensions();
    let (new, roi) = optimal_new_camera_matrix(camera, width, height, 1.0).ok_or_else(|| {
        CalibrationError::ProfileInvalid {
            reason: format!("distortion model cannot be inverted over a {width}x{height} image"),
        }
    })?;

    let (ox, oy, out_w, out_h) = if roi.is_empty() {
        log::warn!("undistort: empty valid region, keeping the full frame");
        (0, 0, width, height)
    } else {
        (roi.x, roi.y, roi.width, roi.height)
    };

    let image = remap(src, out_w, out_h, |u, v| {
        let n = new.to_normalized(Point2::new(f64::from(u + ox), f64::from(v + oy)));
        let d = camera.distortion.distort(n);
        Some(camera.intrinsics.to_pixel(d))
    });

    log::debug!(
        "undistort: {}x{} -> {}x{} (roi at {},{})",
        width,
        height,
        out_w,
        out_h,
        ox,
        oy
    );

    Ok(Undistorted {
        image,
        intrinsics: CameraIntrinsics {
            cx: new.cx - f64::from(ox),
            cy: new.cy - f64::from(oy),
            ..new
        },
        roi: Roi {
            x: ox,
            y: oy,
            width: out_w,
            height: out_h,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::BrownConrady5;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 300.0,
            fy: 300.0,
            cx: 79.5,
            cy: 59.5,
        }
    }

    #[test]
    fn zero_distortion_is_identity() {
        let cam = PinholeCamera::new(intrinsics(), BrownConrady5::default());
        let (new, roi) = optimal_new_camera_matrix(&cam, 160, 120, 1.0).expect("matrix");
        assert!((new.fx - 300.0).abs() < 1e-6 && (new.cx - 79.5).abs() < 1e-6);
        assert_eq!(
            roi,
            Roi {
                x: 0,
                y: 0,
                width: 160,
                height: 120
            }
        );

        let src = RgbImage::from_fn(160, 120, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8]));
        let out = undistort_image(&src, &cam).expect("undistort");
        assert_eq!(out.image, src);
    }

    #[test]
    fn barrel_distortion_crops_to_valid_region() {
        let cam = PinholeCamera::new(
            intrinsics(),
            BrownConrady5 {
                k1: -0.3,
                ..BrownConrady5::default()
            },
        );
        let (_, roi) = optimal_new_camera_matrix(&cam, 160, 120, 1.0).expect("matrix");
        assert!(!roi.is_empty());
        assert!(roi.width < 160 && roi.height < 120, "{roi:?}");

        let src = GrayImage::from_pixel(160, 120, Luma([200]));
        let out = undistort_image(&src, &cam).expect("undistort");
        assert_eq!(out.image.dimensions(), (roi.width, roi.height));
        // every pixel inside the ROI maps back into the source
        assert!(out.image.pixels().all(|p| p.0[0] > 150), "black border left in crop");
    }

    #[test]
    fn alpha_zero_zooms_in() {
        let cam = PinholeCamera::new(
            intrinsics(),
            BrownConrady5 {
                k1: -0.3,
                ..BrownConrady5::default()
            },
        );
        let (keep_all, _) = optimal_new_camera_matrix(&cam, 160, 120, 1.0).expect("matrix");
        let (valid_only, roi) = optimal_new_camera_matrix(&cam, 160, 120, 0.0).expect("matrix");
        assert!(valid_only.fx > keep_all.fx);
        assert!(roi.width >= 158 && roi.height >= 118, "{roi:?}");
    }
}
