//! Binary foreground masks.
//!
//! Two policies: a fixed level followed by erosion for the high-contrast
//! sheet, and Otsu's level for scenes whose contrast is not known up front.
//! Otsu's foreground side is fixed or picked from the image border.
//! Foreground pixels are 255, background 0.

use crate::contour::CONTOUR_INSET_PX;
use image::imageops::invert;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::erode;
use serde::{Deserialize, Serialize};

/// Which side of the Otsu split is foreground.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    BrightForeground,
    DarkForeground,
    /// Whichever side does not own most of the image border.
    #[default]
    Auto,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// `gray > level` is foreground, then a 3x3 erosion `erode_iterations` times.
    Fixed { level: u8, erode_iterations: u8 },
    /// Otsu's level on the blurred gray image.
    Otsu { polarity: Polarity },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// Gaussian sigma applied before thresholding; `<= 0` disables the blur.
    pub blur_sigma: f32,
    pub policy: ThresholdPolicy,
}

impl SegmentationParams {
    /// Sheet-versus-table split used by the quad detector.
    pub fn reference_sheet() -> Self {
        Self {
            blur_sigma: 1.1,
            policy: ThresholdPolicy::Fixed {
                level: 130,
                erode_iterations: 2,
            },
        }
    }

    /// Object-versus-background split used by the reference-object strategy.
    pub fn reference_object() -> Self {
        Self {
            blur_sigma: 1.1,
            policy: ThresholdPolicy::Otsu {
                polarity: Polarity::Auto,
            },
        }
    }

    /// How far inside the true region edge a contour of this mask runs, in
    /// pixels: the erosion plus the half pixel of contour tracing.
    pub fn boundary_inset_px(&self) -> f64 {
        let eroded = match self.policy {
            ThresholdPolicy::Fixed {
                erode_iterations, ..
            } => f64::from(erode_iterations),
            ThresholdPolicy::Otsu { .. } => 0.0,
        };
        eroded + CONTOUR_INSET_PX
    }
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self::reference_sheet()
    }
}

/// BT.601 luma with integer rounding.
pub fn luma(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let y = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
        Luma([y as u8])
    })
}

pub(crate) fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma > 0.0 {
        gaussian_blur_f32(gray, sigma)
    } else {
        gray.clone()
    }
}

/// Segment a color image into a binary mask.
///
/// A degenerate (all-foreground or all-background) mask is returned as is;
/// contour extraction downstream reports it.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(img), fields(w = img.width(), h = img.height())))]
pub fn segment(img: &RgbImage, params: &SegmentationParams) -> GrayImage {
    segment_gray(&luma(img), params)
}

pub fn segment_gray(gray: &GrayImage, params: &SegmentationParams) -> GrayImage {
    let blurred = blur(gray, params.blur_sigma);
    match params.policy {
        ThresholdPolicy::Fixed {
            level,
            erode_iterations,
        } => {
            let mask = threshold(&blurred, level, ThresholdType::Binary);
            if erode_iterations == 0 {
                mask
            } else {
                // an L-inf radius of k equals k passes of a 3x3 square
                erode(&mask, Norm::LInf, erode_iterations)
            }
        }
        ThresholdPolicy::Otsu { polarity } => {
            let level = otsu_level(&blurred);
            log::debug!("segment: otsu level {level}");
            match polarity {
                Polarity::BrightForeground => threshold(&blurred, level, ThresholdType::Binary),
                Polarity::DarkForeground => {
                    threshold(&blurred, level, ThresholdType::BinaryInverted)
                }
                Polarity::Auto => {
                    let mut mask = threshold(&blurred, level, ThresholdType::Binary);
                    if border_foreground_fraction(&mask) > 0.5 {
                        log::debug!("segment: bright side owns the border, inverting");
                        invert(&mut mask);
                    }
                    mask
                }
            }
        }
    }
}

/// Fraction of the outermost pixel ring that is foreground.
pub fn border_foreground_fraction(mask: &GrayImage) -> f64 {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let (mut total, mut fg) = (0usize, 0usize);
    for (x, y, p) in mask.enumerate_pixels() {
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            total += 1;
            fg += usize::from(p.0[0] > 0);
        }
    }
    fg as f64 / total as f64
}

/// Fraction of mask pixels that are foreground.
pub fn foreground_fraction(mask: &GrayImage) -> f64 {
    let total = mask.len();
    if total == 0 {
        return 0.0;
    }
    let fg = mask.as_raw().iter().filter(|&&v| v > 0).count();
    fg as f64 / total as f64
}

/// True for an all-background or all-foreground mask.
pub fn mask_is_degenerate(mask: &GrayImage) -> bool {
    let raw = mask.as_raw();
    match raw.first() {
        None => true,
        Some(&first) => {
            let first_fg = first > 0;
            raw.iter().all(|&v| (v > 0) == first_fg)
        }
    }
}
