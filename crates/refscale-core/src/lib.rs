//! Geometry and image primitives for reference-based object measurement.
//!
//! Everything here works on plain `nalgebra` points and `image` buffers:
//! homographies, reference quads with a fixed corner order, floating-point
//! convex hulls, minimum-area oriented boxes, bilinear sampling and
//! perspective warps.

mod homography;
mod logger;
mod obb;
mod polygon;
mod quad;
mod sampling;

pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use obb::{min_area_rect, OrientedBoundingBox};
pub use polygon::{area, convex_hull, is_convex, signed_area};
pub use quad::{Quad, QuadError};
pub use sampling::{remap, sample_bilinear, warp_perspective, Image8};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
