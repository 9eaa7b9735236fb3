//! Pipeline configuration.
//!
//! Every knob of every stage lives here with its default. Partial JSON files
//! are accepted; missing fields fall back to [`Default`].

use crate::error::MeasureError;
use crate::isolate::IsolatorParams;
use crate::reference_quad::QuadDetectorParams;
use crate::scale::ReferenceObjectParams;
use crate::segment::SegmentationParams;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

/// Physical sheet used as the implicit reference, and the canvas scale it is
/// rectified to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetSpec {
    /// Short side, in millimetres.
    pub width_mm: f64,
    /// Long side, in millimetres.
    pub height_mm: f64,
    /// Rectified canvas pixels per millimetre.
    pub px_per_mm: f64,
}

impl SheetSpec {
    pub const A4: Self = Self {
        width_mm: 210.0,
        height_mm: 297.0,
        px_per_mm: 3.0,
    };

    pub fn with_scale(mut self, px_per_mm: f64) -> Self {
        self.px_per_mm = px_per_mm;
        self
    }

    fn validate(&self) -> Result<(), String> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !(positive(self.width_mm) && positive(self.height_mm) && positive(self.px_per_mm)) {
            return Err(format!("sheet dimensions must be positive: {self:?}"));
        }
        Ok(())
    }
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self::A4
    }
}

/// How pixels are tied to millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStrategy {
    /// Rectify onto a sheet of known size and read the scale off the canvas.
    ImplicitRectified,
    /// Find a reference object of known size among the scene contours.
    ExplicitReferenceObject,
}

impl fmt::Display for CalibrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CalibrationStrategy::ImplicitRectified => "implicit_rectified",
            CalibrationStrategy::ExplicitReferenceObject => "explicit_reference_object",
        })
    }
}

/// The one size reference active in a run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReferenceSpec {
    ImplicitRectified {
        #[serde(default)]
        sheet: SheetSpec,
    },
    ExplicitReferenceObject { width_mm: f64, height_mm: f64 },
}

impl ReferenceSpec {
    pub fn strategy(&self) -> CalibrationStrategy {
        match self {
            ReferenceSpec::ImplicitRectified { .. } => CalibrationStrategy::ImplicitRectified,
            ReferenceSpec::ExplicitReferenceObject { .. } => {
                CalibrationStrategy::ExplicitReferenceObject
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ReferenceSpec::ImplicitRectified { sheet } => sheet.validate(),
            ReferenceSpec::ExplicitReferenceObject {
                width_mm,
                height_mm,
            } => {
                if width_mm.is_finite() && height_mm.is_finite() && *width_mm > 0.0 && *height_mm > 0.0
                {
                    Ok(())
                } else {
                    Err(format!(
                        "reference object size must be positive, got {width_mm} x {height_mm} mm"
                    ))
                }
            }
        }
    }
}

impl Default for ReferenceSpec {
    fn default() -> Self {
        ReferenceSpec::ImplicitRectified {
            sheet: SheetSpec::A4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reference: ReferenceSpec,
    /// Sheet-versus-table segmentation feeding the quad detector.
    pub sheet_segmentation: SegmentationParams,
    pub quad: QuadDetectorParams,
    pub isolator: IsolatorParams,
    pub reference_object: ReferenceObjectParams,
    /// Undistort inputs when a calibration profile is attached.
    pub undistort: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference: ReferenceSpec::default(),
            sheet_segmentation: SegmentationParams::reference_sheet(),
            quad: QuadDetectorParams::default(),
            isolator: IsolatorParams::default(),
            reference_object: ReferenceObjectParams::default(),
            undistort: true,
        }
    }
}

impl PipelineConfig {
    /// Default configuration measuring against a reference object of the
    /// given size.
    pub fn with_reference_object(width_mm: f64, height_mm: f64) -> Self {
        Self {
            reference: ReferenceSpec::ExplicitReferenceObject {
                width_mm,
                height_mm,
            },
            ..Self::default()
        }
    }

    pub fn strategy(&self) -> CalibrationStrategy {
        self.reference.strategy()
    }

    pub fn validate(&self) -> Result<(), MeasureError> {
        self.reference
            .validate()
            .and_then(|_| self.reference_object.validate())
            .map_err(|reason| MeasureError::InvalidConfig { reason })
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, MeasureError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), MeasureError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
