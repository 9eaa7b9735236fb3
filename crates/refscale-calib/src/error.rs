#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("no usable checkerboard views: 0 of {attempted} images produced a complete corner grid")]
    InsufficientData { attempted: usize },
    #[error("calibration profile is invalid: {reason}")]
    ProfileInvalid { reason: String },
    #[error("invalid board description: {reason}")]
    InvalidBoard { reason: String },
    #[error("calibration solve failed: {reason}")]
    SolverFailed { reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
