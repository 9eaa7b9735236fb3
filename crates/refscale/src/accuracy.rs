//! Comparison of measured sizes against externally supplied ground truth.

use crate::error::MeasureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Unit of the numbers in a ground-truth sidecar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthUnit {
    Millimetres,
    /// Sidecars are written by hand with a ruler, in centimetres.
    #[default]
    Centimetres,
}

impl TruthUnit {
    pub fn to_mm(self, value: f64) -> f64 {
        match self {
            Self::Millimetres => value,
            Self::Centimetres => value * 10.0,
        }
    }
}

impl fmt::Display for TruthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Millimetres => "mm",
            Self::Centimetres => "cm",
        })
    }
}

impl FromStr for TruthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm" | "millimetres" => Ok(Self::Millimetres),
            "cm" | "centimetres" => Ok(Self::Centimetres),
            other => Err(format!("unknown unit {other:?}, expected mm or cm")),
        }
    }
}

/// Absolute and relative error per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub measured: (f64, f64),
    pub actual: (f64, f64),
    pub abs_error: (f64, f64),
    /// Percent of the actual value.
    pub rel_error_pct: (f64, f64),
}

impl ErrorMetrics {
    pub fn compute(measured: (f64, f64), actual: (f64, f64)) -> Self {
        let abs_w = (measured.0 - actual.0).abs();
        let abs_h = (measured.1 - actual.1).abs();
        Self {
            measured,
            actual,
            abs_error: (abs_w, abs_h),
            rel_error_pct: (relative_pct(abs_w, actual.0), relative_pct(abs_h, actual.1)),
        }
    }
}

fn relative_pct(abs_error: f64, actual: f64) -> f64 {
    if abs_error == 0.0 {
        0.0
    } else {
        abs_error / actual.abs() * 100.0
    }
}

/// `photo.jpg` -> `photo.txt`.
pub fn truth_sidecar_path(image: impl AsRef<Path>) -> PathBuf {
    image.as_ref().with_extension("txt")
}

/// First non-blank line of the sidecar holding at least two numbers, read
/// in `unit` and returned as `(width, height)` in millimetres. `Ok(None)`
/// when the sidecar does not exist.
pub fn read_truth_sidecar(
    image: impl AsRef<Path>,
    unit: TruthUnit,
) -> Result<Option<(f64, f64)>, MeasureError> {
    let path = truth_sidecar_path(image);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        if let (Some(w), Some(h)) = (fields.next(), fields.next()) {
            let parse = |s: &str| {
                s.parse::<f64>().map(|v| unit.to_mm(v)).map_err(|e| MeasureError::InvalidConfig {
                    reason: format!("{}: {s:?} is not a number: {e}", path.display()),
                })
            };
            return Ok(Some((parse(w)?, parse(h)?)));
        }
    }
    Ok(None)
}
