//! Camera calibration from checkerboard image files.

use crate::error::MeasureError;
use image::GrayImage;
use log::warn;
use refscale_calib::{calibrate_camera, CalibrationParams, CalibrationResult};
use std::path::Path;

/// Calibrate from image files.
///
/// Unreadable files are skipped like images without a board. Indices in the
/// result refer to positions in `paths`.
pub fn calibrate_files<P: AsRef<Path>>(
    paths: &[P],
    params: &CalibrationParams,
) -> Result<CalibrationResult, MeasureError> {
    let mut images: Vec<GrayImage> = Vec::with_capacity(paths.len());
    let mut origin: Vec<usize> = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    for (idx, path) in paths.iter().enumerate() {
        match image::open(path.as_ref()) {
            Ok(img) => {
                images.push(img.to_luma8());
                origin.push(idx);
            }
            Err(e) => {
                warn!("{}: skipped, {e}", path.as_ref().display());
                unreadable.push(idx);
            }
        }
    }

    let mut result = match calibrate_camera(&images, params) {
        Ok(r) => r,
        Err(refscale_calib::CalibrationError::InsufficientData { .. }) => {
            return Err(MeasureError::CalibrationInsufficientData {
                attempted: paths.len(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    for view in &mut result.views {
        view.image_index = origin[view.image_index];
    }
    let mut skipped: Vec<usize> = result.skipped.iter().map(|&i| origin[i]).collect();
    skipped.extend(unreadable);
    skipped.sort_unstable();
    result.skipped = skipped;
    Ok(result)
}
