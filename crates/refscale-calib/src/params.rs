use crate::CalibrationError;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Physical layout of a planar checkerboard.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    /// Inner corners along a row.
    pub cols: u32,
    /// Inner corners along a column.
    pub rows: u32,
    /// Side length of one square, in millimetres.
    pub square_size: f64,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            cols: 9,
            rows: 7,
            square_size: 20.0,
        }
    }
}

impl BoardSpec {
    pub fn new(cols: u32, rows: u32, square_size: f64) -> Self {
        Self {
            cols,
            rows,
            square_size,
        }
    }

    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.cols < 2 || self.rows < 2 {
            return Err(CalibrationError::InvalidBoard {
                reason: format!(
                    "need at least 2x2 inner corners, got {}x{}",
                    self.cols, self.rows
                ),
            });
        }
        if !(self.square_size.is_finite() && self.square_size > 0.0) {
            return Err(CalibrationError::InvalidBoard {
                reason: format!("square size must be positive, got {}", self.square_size),
            });
        }
        Ok(())
    }

    /// Board-frame corner positions, row-major, on the `Z = 0` plane.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        (0..self.rows)
            .flat_map(|j| {
                (0..self.cols).map(move |i| {
                    Point3::new(
                        i as f64 * self.square_size,
                        j as f64 * self.square_size,
                        0.0,
                    )
                })
            })
            .collect()
    }
}

/// ChESS corner detector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerDetectorParams {
    /// Keep responses above this fraction of the strongest response.
    pub threshold_rel: f32,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: u32,
    /// Images with a shorter side are not searched.
    pub min_image_side: u32,
}

impl Default for CornerDetectorParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_image_side: 16,
        }
    }
}

/// Neighbour search settings for assembling corners into a grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f64,
    pub max_spacing_pix: f64,
    /// Nearest corners inspected per node.
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f64,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 6.0,
            max_spacing_pix: 400.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Nonlinear refinement settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub max_iters: usize,
    /// Relative cost-reduction tolerance.
    pub ftol: f64,
    /// Relative parameter-step tolerance.
    pub xtol: f64,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    /// Keep `p1`, `p2` at zero.
    pub fix_tangential: bool,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            fix_k3: false,
            fix_tangential: false,
        }
    }
}

/// Everything the camera calibrator needs besides the images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CalibrationParams {
    pub board: BoardSpec,
    pub detector: CornerDetectorParams,
    pub graph: GridGraphParams,
    pub solver: SolverParams,
}

impl CalibrationParams {
    pub fn for_board(board: BoardSpec) -> Self {
        Self {
            board,
            ..Self::default()
        }
    }
}
