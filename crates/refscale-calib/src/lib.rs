//! Checkerboard camera calibration and lens undistortion.
//!
//! ## Quickstart
//!
//! ```no_run
//! use refscale_calib::{calibrate_camera, BoardSpec, CalibrationParams};
//!
//! let images: Vec<image::GrayImage> = Vec::new();
//! let params = CalibrationParams::for_board(BoardSpec::new(9, 7, 20.0));
//! match calibrate_camera(&images, &params) {
//!     Ok(result) => println!("rms {:.3} px", result.profile.reprojection_error),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! Pipeline:
//! 1. ChESS corners from `chess-corners`.
//! 2. A 4-connected grid graph over KdTree neighbours, with mutual,
//!    orientation-checked links.
//! 3. BFS labelling into a complete `cols x rows` board.
//! 4. Per-view homographies, closed-form intrinsics and poses.
//! 5. `levenberg-marquardt` refinement of intrinsics, distortion and poses.

mod calibrate;
mod camera;
mod chessboard;
mod corners;
mod error;
mod gridgraph;
mod init;
mod lm;
mod params;
mod profile;
mod undistort;

pub use calibrate::{calibrate_camera, calibrate_from_views, CalibrationResult, ViewReport};
pub use camera::{BrownConrady5, CameraIntrinsics, PinholeCamera};
pub use chessboard::{detect_chessboard, ChessboardDetection, ChessboardDetector};
pub use corners::{chess_config, detect_corners, XCorner};
pub use error::CalibrationError;
pub use lm::{SolveReport, Termination};
pub use params::{BoardSpec, CalibrationParams, CornerDetectorParams, GridGraphParams, SolverParams};
pub use profile::CalibrationProfile;
pub use undistort::{optimal_new_camera_matrix, undistort_image, Roi, Undistorted};
