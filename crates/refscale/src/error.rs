use refscale_calib::CalibrationError;
use refscale_core::QuadError;
use serde::Serialize;
use std::fmt;

/// Pipeline stage a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Undistort,
    Segmentation,
    ReferenceQuad,
    Rectification,
    Isolation,
    Scaling,
    Calibration,
    Persistence,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Undistort => "undistort",
            Stage::Segmentation => "segmentation",
            Stage::ReferenceQuad => "reference_quad",
            Stage::Rectification => "rectification",
            Stage::Isolation => "isolation",
            Stage::Scaling => "scaling",
            Stage::Calibration => "calibration",
            Stage::Persistence => "persistence",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MeasureError {
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
    #[error("{stage}: degenerate mask ({:.1}% foreground)", foreground_fraction * 100.0)]
    SegmentationDegenerate { stage: Stage, foreground_fraction: f64 },
    #[error("no contour simplifies to a quadrilateral ({contours} candidates)")]
    ReferenceQuadNotFound { contours: usize },
    #[error("reference quad rejected: {0}")]
    DegenerateQuad(#[from] QuadError),
    #[error("{stage}: object not found: {reason}")]
    ObjectNotFound { stage: Stage, reason: String },
    #[error("no usable checkerboard views: 0 of {attempted} images produced a complete corner grid")]
    CalibrationInsufficientData { attempted: usize },
    #[error("calibration profile is invalid: {reason}")]
    CalibrationProfileInvalid { reason: String },
    #[error("calibration failed: {0}")]
    Calibration(CalibrationError),
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MeasureError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            MeasureError::InvalidImage { .. } => "invalid_image",
            MeasureError::SegmentationDegenerate { .. } => "segmentation_degenerate",
            MeasureError::ReferenceQuadNotFound { .. } => "reference_quad_not_found",
            MeasureError::DegenerateQuad(_) => "degenerate_quad",
            MeasureError::ObjectNotFound { .. } => "object_not_found",
            MeasureError::CalibrationInsufficientData { .. } => "calibration_insufficient_data",
            MeasureError::CalibrationProfileInvalid { .. } => "calibration_profile_invalid",
            MeasureError::Calibration(_) => "calibration_failed",
            MeasureError::InvalidConfig { .. } => "invalid_config",
            MeasureError::Io(_) => "io",
            MeasureError::Json(_) => "json",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            MeasureError::InvalidImage { .. } | MeasureError::InvalidConfig { .. } => Stage::Input,
            MeasureError::SegmentationDegenerate { stage, .. } => *stage,
            MeasureError::ReferenceQuadNotFound { .. } | MeasureError::DegenerateQuad(_) => {
                Stage::ReferenceQuad
            }
            MeasureError::ObjectNotFound { stage, .. } => *stage,
            MeasureError::CalibrationInsufficientData { .. } | MeasureError::Calibration(_) => {
                Stage::Calibration
            }
            MeasureError::CalibrationProfileInvalid { .. } => Stage::Undistort,
            MeasureError::Io(_) | MeasureError::Json(_) => Stage::Persistence,
        }
    }

    /// Whether a batch run should report this image as failed and move on.
    pub fn is_per_image(&self) -> bool {
        !matches!(
            self,
            MeasureError::CalibrationInsufficientData { .. }
                | MeasureError::Calibration(_)
                | MeasureError::InvalidConfig { .. }
        )
    }
}

impl From<CalibrationError> for MeasureError {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::InsufficientData { attempted } => {
                MeasureError::CalibrationInsufficientData { attempted }
            }
            CalibrationError::ProfileInvalid { reason } => {
                MeasureError::CalibrationProfileInvalid { reason }
            }
            CalibrationError::Io(e) => MeasureError::Io(e),
            CalibrationError::Json(e) => MeasureError::Json(e),
            other => MeasureError::Calibration(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_errors_map_onto_the_taxonomy() {
        let e: MeasureError = CalibrationError::InsufficientData { attempted: 4 }.into();
        assert_eq!(e.code(), "calibration_insufficient_data");
        assert_eq!(e.stage(), Stage::Calibration);
        assert!(!e.is_per_image());

        let e: MeasureError = CalibrationError::ProfileInvalid {
            reason: "nan".into(),
        }
        .into();
        assert_eq!(e.code(), "calibration_profile_invalid");

        let e: MeasureError = CalibrationError::SolverFailed {
            reason: "diverged".into(),
        }
        .into();
        assert_eq!(e.code(), "calibration_failed");
    }

    #[test]
    fn codes_are_distinct_per_detection_failure() {
        let errors = [
            MeasureError::InvalidImage {
                reason: "empty".into(),
            },
            MeasureError::SegmentationDegenerate {
                stage: Stage::Segmentation,
                foreground_fraction: 0.0,
            },
            MeasureError::ReferenceQuadNotFound { contours: 3 },
            MeasureError::DegenerateQuad(QuadError::NotConvex),
            MeasureError::ObjectNotFound {
                stage: Stage::Isolation,
                reason: "empty mask".into(),
            },
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(|e| e.is_per_image()));
        assert_eq!(errors[3].stage(), Stage::ReferenceQuad);
    }

    #[test]
    fn messages_name_the_stage() {
        let e = MeasureError::SegmentationDegenerate {
            stage: Stage::Isolation,
            foreground_fraction: 1.0,
        };
        assert_eq!(e.to_string(), "isolation: degenerate mask (100.0% foreground)");
    }
}
