//! One configured measurement pipeline for both calibration strategies.

use crate::config::{CalibrationStrategy, PipelineConfig, ReferenceSpec, SheetSpec};
use crate::dimensions::pixel_footprint;
use crate::error::{MeasureError, Stage};
use crate::isolate::isolate_object;
use crate::rectify::rectify_inset;
use crate::reference_quad::detect_reference_quad;
use crate::scale::{measure_with_reference_object, scale_rectified};
use crate::segment::segment;
use image::RgbImage;
use log::{debug, info, warn};
use nalgebra::Point2;
use rayon::prelude::*;
use refscale_calib::CalibrationProfile;
use refscale_core::{OrientedBoundingBox, Quad};
use serde::Serialize;
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

/// How the scale of a measurement was established.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleReference {
    /// Rectified sheet; `obb` and `hull` are in canvas pixels.
    Sheet {
        quad: Quad,
        px_per_mm: f64,
        width_mm: f64,
        height_mm: f64,
    },
    /// Reference object; `obb` and `hull` are in image pixels.
    Object {
        reference_box: OrientedBoundingBox,
        px_per_mm: f64,
    },
}

/// Final size of the measured object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasurementResult {
    /// Longer side, millimetres.
    pub width_mm: f64,
    /// Shorter side, millimetres.
    pub height_mm: f64,
    pub obb: OrientedBoundingBox,
    pub hull: Vec<Point2<f64>>,
    pub strategy: CalibrationStrategy,
    pub reference: ScaleReference,
    /// Whether lens distortion was removed before measuring.
    pub undistorted: bool,
}

/// Decode an image file as 8-bit RGB. Missing and undecodable files are
/// both [`MeasureError::InvalidImage`].
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage, MeasureError> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| MeasureError::InvalidImage {
        reason: format!("{}: {e}", path.display()),
    })?;
    Ok(img.to_rgb8())
}

/// Measurement pipeline with an optional, shared calibration profile.
#[derive(Clone, Debug)]
pub struct MeasurementPipeline {
    config: PipelineConfig,
    profile: Option<Arc<CalibrationProfile>>,
}

impl MeasurementPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, MeasureError> {
        config.validate()?;
        Ok(Self {
            config,
            profile: None,
        })
    }

    /// Attach a camera profile; inputs are undistorted first when
    /// `config.undistort` is set.
    pub fn with_profile(mut self, profile: Arc<CalibrationProfile>) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn profile(&self) -> Option<&CalibrationProfile> {
        self.profile.as_deref()
    }

    pub fn strategy(&self) -> CalibrationStrategy {
        self.config.strategy()
    }

    /// Undistorted copy of `img`, or `img` itself when there is no profile or
    /// it cannot be applied.
    fn prepare<'a>(&self, img: &'a RgbImage) -> (Cow<'a, RgbImage>, bool) {
        let profile = match (&self.profile, self.config.undistort) {
            (Some(p), true) => p,
            _ => return (Cow::Borrowed(img), false),
        };
        match profile.undistort(img) {
            Ok(u) => {
                debug!(
                    "undistort: {}x{} -> {}x{} (roi at {}, {})",
                    img.width(),
                    img.height(),
                    u.image.width(),
                    u.image.height(),
                    u.roi.x,
                    u.roi.y
                );
                (Cow::Owned(u.image), true)
            }
            Err(e) => {
                warn!("undistort failed, measuring the original image: {e}");
                (Cow::Borrowed(img), false)
            }
        }
    }

    /// Measure the dominant object in one decoded image.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip(self, img), fields(w = img.width(), h = img.height(), strategy = %self.strategy())))]
    pub fn measure(&self, img: &RgbImage) -> Result<MeasurementResult, MeasureError> {
        if img.width() == 0 || img.height() == 0 {
            return Err(MeasureError::InvalidImage {
                reason: format!("empty image ({}x{})", img.width(), img.height()),
            });
        }
        let (frame, undistorted) = self.prepare(img);

        let mut result = match self.config.reference {
            ReferenceSpec::ImplicitRectified { sheet } => self.measure_rectified(&frame, &sheet)?,
            ReferenceSpec::ExplicitReferenceObject {
                width_mm,
                height_mm,
            } => {
                let m = measure_with_reference_object(
                    &frame,
                    width_mm,
                    height_mm,
                    &self.config.reference_object,
                )?;
                MeasurementResult {
                    width_mm: m.width_mm,
                    height_mm: m.height_mm,
                    obb: m.object_box,
                    hull: m.object_hull,
                    strategy: CalibrationStrategy::ExplicitReferenceObject,
                    reference: ScaleReference::Object {
                        reference_box: m.reference_box,
                        px_per_mm: m.px_per_mm,
                    },
                    undistorted: false,
                }
            }
        };
        result.undistorted = undistorted;
        info!(
            "measured {:.1} x {:.1} mm ({})",
            result.width_mm, result.height_mm, result.strategy
        );
        Ok(result)
    }

    fn measure_rectified(&self, img: &RgbImage, sheet: &SheetSpec) -> Result<MeasurementResult, MeasureError> {
        let mask = segment(img, &self.config.sheet_segmentation);
        let quad = detect_reference_quad(&mask, &self.config.quad)?;
        let inset = self.config.sheet_segmentation.boundary_inset_px();
        let rectified = rectify_inset(img, &quad, sheet, inset)?;
        let object = isolate_object(&rectified.image, &self.config.isolator)?;
        let obb = pixel_footprint(&object.hull).ok_or_else(|| MeasureError::ObjectNotFound {
            stage: Stage::Isolation,
            reason: "empty outline".to_string(),
        })?;
        let (width_mm, height_mm) = scale_rectified(&obb, rectified.px_per_mm);
        Ok(MeasurementResult {
            width_mm,
            height_mm,
            obb,
            hull: object.hull,
            strategy: CalibrationStrategy::ImplicitRectified,
            reference: ScaleReference::Sheet {
                quad,
                px_per_mm: rectified.px_per_mm,
                width_mm: rectified.width_mm,
                height_mm: rectified.height_mm,
            },
            undistorted: false,
        })
    }

    pub fn measure_file(&self, path: impl AsRef<Path>) -> Result<MeasurementResult, MeasureError> {
        let img = load_image(path)?;
        self.measure(&img)
    }

    /// Measure every image independently; one failure never stops the rest.
    /// Results come back in input order.
    pub fn measure_batch(&self, images: &[RgbImage]) -> Vec<Result<MeasurementResult, MeasureError>> {
        images
            .par_iter()
            .enumerate()
            .map(|(idx, img)| {
                let r = self.measure(img);
                if let Err(e) = &r {
                    warn!("image {idx}: {} failed: {e}", e.stage());
                }
                r
            })
            .collect()
    }

    /// [`MeasurementPipeline::measure_batch`] over image files.
    pub fn measure_files<P>(&self, paths: &[P]) -> Vec<Result<MeasurementResult, MeasureError>>
    where
        P: AsRef<Path> + Sync,
    {
        paths
            .par_iter()
            .map(|p| {
                let r = self.measure_file(p);
                if let Err(e) = &r {
                    warn!("{}: {} failed: {e}", p.as_ref().display(), e.stage());
                }
                r
            })
            .collect()
    }
}
