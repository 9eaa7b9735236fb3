//! Estimate the real-world size of an object photographed next to a size
//! reference.
//!
//! Two ways to tie pixels to millimetres:
//!
//! * **Implicit, rectified** ([`CalibrationStrategy::ImplicitRectified`]):
//!   the object lies on a sheet of known size (A4 by default). The sheet is
//!   found, rectified to a canvas of known px/mm, and the object is isolated
//!   on that canvas.
//! * **Explicit reference object**
//!   ([`CalibrationStrategy::ExplicitReferenceObject`]): a second object of
//!   known size lies in the scene; it sets the px/mm scale for the object of
//!   interest.
//!
//! Either way the object's convex outline is fitted with a minimum-area
//! oriented box and reported longer side first. A [`CalibrationProfile`]
//! from [`calibrate_files`] (or [`refscale_calib::calibrate_camera`]) can be
//! attached to remove lens distortion first.
//!
//! ```no_run
//! use refscale::{MeasurementPipeline, PipelineConfig};
//!
//! let pipeline = MeasurementPipeline::new(PipelineConfig::default())?;
//! let result = pipeline.measure_file("object_on_a4.jpg")?;
//! println!("{:.1} x {:.1} mm", result.width_mm, result.height_mm);
//! # Ok::<(), refscale::MeasureError>(())
//! ```

pub mod accuracy;
mod calibration;
pub mod config;
pub mod contour;
mod dimensions;
mod error;
pub mod isolate;
mod pipeline;
pub mod rectify;
pub mod reference_quad;
pub mod scale;
pub mod segment;

pub use accuracy::{read_truth_sidecar, truth_sidecar_path, ErrorMetrics, TruthUnit};
pub use calibration::calibrate_files;
pub use config::{CalibrationStrategy, PipelineConfig, ReferenceSpec, SheetSpec};
pub use dimensions::{extract_dimensions, pixel_footprint};
pub use error::{MeasureError, Stage};
pub use isolate::{isolate_object, IsolatedObject, IsolatorParams};
pub use pipeline::{load_image, MeasurementPipeline, MeasurementResult, ScaleReference};
pub use rectify::{rectify, rectify_inset, RectifiedImage};
pub use reference_quad::{detect_reference_quad, QuadDetectorParams};
pub use scale::{
    measure_with_reference_object, pixels_per_mm, scale_rectified, CandidateSource,
    ReferenceObjectMeasurement, ReferenceObjectParams,
};
pub use segment::{segment, Polarity, SegmentationParams, ThresholdPolicy};

pub use refscale_calib::{BoardSpec, CalibrationParams, CalibrationProfile, CalibrationResult};
pub use refscale_core::{Homography, OrientedBoundingBox, Quad};

#[cfg(feature = "tracing")]
pub use refscale_core::init_tracing;
pub use refscale_core::{init_with_level, level_from_verbosity};
