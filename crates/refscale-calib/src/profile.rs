//! Persisted camera calibration.

use crate::camera::{BrownConrady5, CameraIntrinsics, PinholeCamera};
use crate::undistort::{undistort_image, Undistorted};
use crate::CalibrationError;
use image::Pixel;
use nalgebra::Matrix3;
use refscale_core::Image8;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Camera matrix, distortion coefficients and fit quality of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Row-major 3x3 intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    pub dist_coeffs: [f64; 5],
    /// RMS reprojection error of the fit, in pixels.
    pub reprojection_error: f64,
    /// Size of the calibration images, `[width, height]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<[u32; 2]>,
}

impl CalibrationProfile {
    pub fn from_camera(camera: &PinholeCamera, reprojection_error: f64, image_size: Option<[u32; 2]>) -> Self {
        let k = camera.intrinsics.k_matrix();
        Self {
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            dist_coeffs: camera.distortion.to_array(),
            reprojection_error,
            image_size,
        }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        let m = &self.camera_matrix;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], //
            m[1][0], m[1][1], m[1][2], //
            m[2][0], m[2][1], m[2][2],
        )
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::from_k_matrix(&self.k_matrix())
    }

    pub fn distortion(&self) -> BrownConrady5 {
        BrownConrady5::from_array(self.dist_coeffs)
    }

    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics(), self.distortion())
    }

    /// Structural checks: finite values, positive focal lengths, a
    /// `[0, 0, 1]` last row and no skew.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |reason: &str| {
            Err(CalibrationError::ProfileInvalid {
                reason: reason.to_string(),
            })
        };

        let all_finite = self
            .camera_matrix
            .iter()
            .flatten()
            .chain(self.dist_coeffs.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return invalid("non-finite coefficient");
        }
        let m = &self.camera_matrix;
        if m[0][0] <= 0.0 || m[1][1] <= 0.0 {
            return invalid("focal lengths must be positive");
        }
        if m[2] != [0.0, 0.0, 1.0] {
            return invalid("last camera matrix row must be [0, 0, 1]");
        }
        if m[0][1] != 0.0 || m[1][0] != 0.0 {
            return invalid("skewed camera matrices are not supported");
        }
        if !(self.reprojection_error.is_finite() && self.reprojection_error >= 0.0) {
            return invalid("reprojection error must be a non-negative number");
        }
        if let Some([w, h]) = self.image_size {
            if w == 0 || h == 0 {
                return invalid("image size must be non-zero");
            }
        }
        Ok(())
    }

    /// Load and validate a profile written by [`CalibrationProfile::write_json`].
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        let profile: Self = serde_json::from_str(&raw)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Undistort an image taken with this camera.
    pub fn undistort<P>(&self, img: &Image8<P>) -> Result<Undistorted<P>, CalibrationError>
    where
        P: Pixel<Subpixel = u8>,
    {
        self.validate()?;
        if let Some([w, h]) = self.image_size {
            if img.dimensions() != (w, h) {
                log::warn!(
                    "undistort: image is {}x{}, profile was calibrated at {}x{}",
                    img.width(),
                    img.height(),
                    w,
                    h
                );
            }
        }
        undistort_image(img, &self.camera())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CalibrationProfile {
        CalibrationProfile::from_camera(
            &PinholeCamera::new(
                CameraIntrinsics {
                    fx: 700.0,
                    fy: 690.0,
                    cx: 320.0,
                    cy: 240.0,
                },
                BrownConrady5 {
                    k1: -0.1,
                    k2: 0.01,
                    p1: 0.0,
                    p2: 0.0,
                    k3: 0.0,
                },
            ),
            0.21,
            Some([640, 480]),
        )
    }

    #[test]
    fn camera_round_trips_through_profile() {
        let p = profile();
        assert_eq!(p.intrinsics().fx, 700.0);
        assert_eq!(p.distortion().k1, -0.1);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validation_rejects_broken_matrices() {
        let mut p = profile();
        p.camera_matrix[0][0] = -1.0;
        assert!(matches!(p.validate(), Err(CalibrationError::ProfileInvalid { .. })));

        let mut p = profile();
        p.dist_coeffs[1] = f64::NAN;
        assert!(p.validate().is_err());

        let mut p = profile();
        p.camera_matrix[2][2] = 2.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn json_without_image_size_is_accepted() {
        let raw = r#"{
            "camera_matrix": [[500.0, 0.0, 160.0], [0.0, 500.0, 120.0], [0.0, 0.0, 1.0]],
            "dist_coeffs": [0.0, 0.0, 0.0, 0.0, 0.0],
            "reprojection_error": 0.3
        }"#;
        let p: CalibrationProfile = serde_json::from_str(raw).expect("parse");
        assert_eq!(p.image_size, None);
        assert!(p.validate().is_ok());
    }
}
