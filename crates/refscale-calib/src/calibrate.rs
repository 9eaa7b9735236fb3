//! Camera calibration from checkerboard views.

use crate::camera::{BrownConrady5, CameraIntrinsics, PinholeCamera};
use crate::chessboard::{ChessboardDetection, ChessboardDetector};
use crate::init::{
    intrinsics_from_homographies, intrinsics_with_centered_principal_point, pose_from_homography,
};
use crate::lm::{finite_difference_step, minimize, NllsProblem, SolveOptions, SolveReport};
use crate::params::{BoardSpec, CalibrationParams, SolverParams};
use crate::profile::CalibrationProfile;
use crate::CalibrationError;
use image::GrayImage;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Isometry3, Point2, Point3, Vector3};
use rayon::prelude::*;
use refscale_core::estimate_homography;
use serde::{Deserialize, Serialize};

/// Residual used for points that project behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1e3;

/// Per-view outcome of a calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewReport {
    /// Position of the view in the calibrator's input.
    pub image_index: usize,
    pub rms_error: f64,
    /// Board-to-camera rotation vector (axis times angle).
    pub rotation: [f64; 3],
    /// Board-to-camera translation, in board units.
    pub translation: [f64; 3],
}

#[derive(Clone, Debug)]
pub struct CalibrationResult {
    pub profile: CalibrationProfile,
    pub views: Vec<ViewReport>,
    /// Inputs that gave no usable board.
    pub skipped: Vec<usize>,
    pub solve: SolveReport,
}

/// Detect the board in every image and calibrate from the views where it
/// was found.
///
/// Images whose size differs from the first one are skipped. Fails with
/// [`CalibrationError::InsufficientData`] when no image yields a board.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip(images, params), fields(images = images.len()))
)]
pub fn calibrate_camera(
    images: &[GrayImage],
    params: &CalibrationParams,
) -> Result<CalibrationResult, CalibrationError> {
    params.board.validate()?;
    let Some(first) = images.first() else {
        return Err(CalibrationError::InsufficientData { attempted: 0 });
    };
    let size = (first.width(), first.height());

    let detector = ChessboardDetector::new(params.board, params.detector.clone(), params.graph.clone());
    let detections: Vec<Option<ChessboardDetection>> = images
        .par_iter()
        .enumerate()
        .map(|(idx, img)| {
            if (img.width(), img.height()) != size {
                warn!(
                    "image {idx}: size {}x{} differs from {}x{}, skipped",
                    img.width(),
                    img.height(),
                    size.0,
                    size.1
                );
                return None;
            }
            let det = detector.detect(img);
            if det.is_none() {
                warn!("image {idx}: no complete {}x{} board", params.board.cols, params.board.rows);
            }
            det
        })
        .collect();

    let views: Vec<(usize, Vec<Point2<f64>>)> = detections
        .into_iter()
        .enumerate()
        .filter_map(|(idx, det)| det.map(|d| (idx, d.corners)))
        .collect();
    info!("calibration: board found in {} of {} images", views.len(), images.len());

    let mut result = calibrate_from_views(&views, &params.board, size, &params.solver)
        .map_err(|e| match e {
            CalibrationError::InsufficientData { .. } => CalibrationError::InsufficientData {
                attempted: images.len(),
            },
            other => other,
        })?;
    let used: Vec<usize> = result.views.iter().map(|v| v.image_index).collect();
    result.skipped = (0..images.len()).filter(|i| !used.contains(i)).collect();
    Ok(result)
}

/// Calibrate from already detected corner grids.
///
/// `views` pairs an image index with its row-major corners; every grid must
/// hold `board.corner_count()` points.
pub fn calibrate_from_views(
    views: &[(usize, Vec<Point2<f64>>)],
    board: &BoardSpec,
    image_size: (u32, u32),
    solver: &SolverParams,
) -> Result<CalibrationResult, CalibrationError> {
    board.validate()?;
    let object = board.object_points();
    let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();

    let mut skipped = Vec::new();
    let mut usable: Vec<(usize, &[Point2<f64>], nalgebra::Matrix3<f64>)> = Vec::new();
    for (idx, corners) in views {
        if corners.len() != object.len() {
            warn!("view {idx}: {} corners, expected {}", corners.len(), object.len());
            skipped.push(*idx);
            continue;
        }
        match estimate_homography(&plane, corners) {
            Some(h) => usable.push((*idx, corners.as_slice(), h.h)),
            None => {
                warn!("view {idx}: degenerate corner layout");
                skipped.push(*idx);
            }
        }
    }
    if usable.is_empty() {
        return Err(CalibrationError::InsufficientData {
            attempted: views.len(),
        });
    }

    let homographies: Vec<_> = usable.iter().map(|u| u.2).collect();
    let (w, h) = image_size;
    let intrinsics = intrinsics_from_homographies(&homographies)
        .filter(|k| {
            k.fx > 0.0
                && k.fy > 0.0
                && (0.0..f64::from(w)).contains(&k.cx)
                && (0.0..f64::from(h)).contains(&k.cy)
        })
        .unwrap_or_else(|| {
            debug!("calibration: principal point fixed at the image centre for initialisation");
            intrinsics_with_centered_principal_point(&homographies, w, h)
        });
    let k = intrinsics.k_matrix();

    let mut observations = Vec::new();
    let mut poses = Vec::new();
    for (idx, corners, hm) in &usable {
        match pose_from_homography(&k, hm) {
            Some(pose) => {
                observations.push((*idx, corners.to_vec()));
                poses.push(pose);
            }
            None => {
                warn!("view {idx}: no pose from homography");
                skipped.push(*idx);
            }
        }
    }
    if observations.is_empty() {
        return Err(CalibrationError::InsufficientData {
            attempted: views.len(),
        });
    }

    let problem = CalibrationProblem::new(object, observations, solver);
    let x0 = problem.pack(&PinholeCamera::new(intrinsics, BrownConrady5::default()), &poses);
    let opts = SolveOptions {
        max_iters: solver.max_iters,
        ftol: solver.ftol,
        xtol: solver.xtol,
        ..SolveOptions::default()
    };
    let (x, report) = minimize(&problem, x0, &opts);
    if !x.iter().all(|v| v.is_finite()) {
        return Err(CalibrationError::SolverFailed {
            reason: "non-finite parameters after refinement".into(),
        });
    }

    let camera = problem.camera(&x);
    let residuals = problem.residuals(&x);
    let total_points: usize = problem.views.iter().map(|v| v.1.len()).sum();
    let rms = (residuals.norm_squared() / total_points as f64).sqrt();

    let mut reports = Vec::with_capacity(problem.views.len());
    let mut offset = 0;
    for (v, (idx, corners)) in problem.views.iter().enumerate() {
        let n = corners.len();
        let block = residuals.rows(offset, 2 * n);
        offset += 2 * n;
        let pose = problem.pose(&x, v);
        let rot = pose.rotation.scaled_axis();
        let t = pose.translation.vector;
        reports.push(ViewReport {
            image_index: *idx,
            rms_error: (block.norm_squared() / n as f64).sqrt(),
            rotation: [rot.x, rot.y, rot.z],
            translation: [t.x, t.y, t.z],
        });
    }

    info!(
        "calibration: rms {:.4} px over {} views, fx {:.2} fy {:.2} cx {:.2} cy {:.2}",
        rms,
        reports.len(),
        camera.intrinsics.fx,
        camera.intrinsics.fy,
        camera.intrinsics.cx,
        camera.intrinsics.cy
    );

    let profile = CalibrationProfile::from_camera(&camera, rms, Some([w, h]));
    profile.validate()?;
    skipped.sort_unstable();
    Ok(CalibrationResult {
        profile,
        views: reports,
        skipped,
        solve: report,
    })
}

/// Intrinsic slots in the packed parameter vector.
const FX: usize = 0;
const FY: usize = 1;
const CX: usize = 2;
const CY: usize = 3;
const K1: usize = 4;
const K2: usize = 5;
const P1: usize = 6;
const P2: usize = 7;
const K3: usize = 8;
const POSE_DOF: usize = 6;

/// Reprojection problem over the free intrinsics and one pose per view.
///
/// Layout: free intrinsics first, then `[rx, ry, rz, tx, ty, tz]` per view.
struct CalibrationProblem {
    object: Vec<Point3<f64>>,
    views: Vec<(usize, Vec<Point2<f64>>)>,
    free: Vec<usize>,
}

impl CalibrationProblem {
    fn new(object: Vec<Point3<f64>>, views: Vec<(usize, Vec<Point2<f64>>)>, solver: &SolverParams) -> Self {
        let free = (FX..=K3)
            .filter(|&slot| match slot {
                P1 | P2 => !solver.fix_tangential,
                K3 => !solver.fix_k3,
                _ => true,
            })
            .collect();
        Self {
            object,
            views,
            free,
        }
    }

    fn pack(&self, camera: &PinholeCamera, poses: &[Isometry3<f64>]) -> DVector<f64> {
        let all = intrinsic_slots(camera);
        let mut x = DVector::zeros(self.num_params());
        for (k, &slot) in self.free.iter().enumerate() {
            x[k] = all[slot];
        }
        for (v, pose) in poses.iter().enumerate() {
            let base = self.free.len() + POSE_DOF * v;
            let r = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            for (k, value) in [r.x, r.y, r.z, t.x, t.y, t.z].into_iter().enumerate() {
                x[base + k] = value;
            }
        }
        x
    }

    fn camera(&self, x: &DVector<f64>) -> PinholeCamera {
        let mut all = [0.0; 9];
        for (k, &slot) in self.free.iter().enumerate() {
            all[slot] = x[k];
        }
        PinholeCamera::new(
            CameraIntrinsics {
                fx: all[FX],
                fy: all[FY],
                cx: all[CX],
                cy: all[CY],
            },
            BrownConrady5 {
                k1: all[K1],
                k2: all[K2],
                p1: all[P1],
                p2: all[P2],
                k3: all[K3],
            },
        )
    }

    fn pose(&self, x: &DVector<f64>, view: usize) -> Isometry3<f64> {
        let b = self.free.len() + POSE_DOF * view;
        Isometry3::new(
            Vector3::new(x[b + 3], x[b + 4], x[b + 5]),
            Vector3::new(x[b], x[b + 1], x[b + 2]),
        )
    }

    fn view_residuals(&self, camera: &PinholeCamera, pose: &Isometry3<f64>, view: usize, out: &mut [f64]) {
        let observed = &self.views[view].1;
        for (k, (p, obs)) in self.object.iter().zip(observed).enumerate() {
            let (rx, ry) = match camera.project(pose, p) {
                Some(proj) => (proj.x - obs.x, proj.y - obs.y),
                None => (BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY),
            };
            out[2 * k] = rx;
            out[2 * k + 1] = ry;
        }
    }

    fn num_params(&self) -> usize {
        self.free.len() + POSE_DOF * self.views.len()
    }

    fn num_residuals(&self) -> usize {
        2 * self.object.len() * self.views.len()
    }

    fn view_offset(&self, view: usize) -> usize {
        2 * self.object.len() * view
    }
}

fn intrinsic_slots(camera: &PinholeCamera) -> [f64; 9] {
    let i = camera.intrinsics;
    let [k1, k2, p1, p2, k3] = camera.distortion.to_array();
    [i.fx, i.fy, i.cx, i.cy, k1, k2, p1, p2, k3]
}

impl NllsProblem for CalibrationProblem {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let camera = self.camera(x);
        let per_view = 2 * self.object.len();
        let mut r = DVector::zeros(self.num_residuals());
        for v in 0..self.views.len() {
            let offset = self.view_offset(v);
            let pose = self.pose(x, v);
            self.view_residuals(
                &camera,
                &pose,
                v,
                &mut r.as_mut_slice()[offset..offset + per_view],
            );
        }
        r
    }

    /// Forward differences; pose columns only touch their own view's rows.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let r0 = self.residuals(x);
        let mut j = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut xp = x.clone();

        for c in 0..self.free.len() {
            let step = finite_difference_step(x[c]);
            xp[c] = x[c] + step;
            let r = self.residuals(&xp);
            j.set_column(c, &((r - &r0) / step));
            xp[c] = x[c];
        }

        let camera = self.camera(x);
        let per_view = 2 * self.object.len();
        let mut block = vec![0.0; per_view];
        for v in 0..self.views.len() {
            let offset = self.view_offset(v);
            for k in 0..POSE_DOF {
                let c = self.free.len() + POSE_DOF * v + k;
                let step = finite_difference_step(x[c]);
                xp[c] = x[c] + step;
                let pose = self.pose(&xp, v);
                self.view_residuals(&camera, &pose, v, &mut block);
                for (row, value) in block.iter().enumerate() {
                    j[(offset + row, c)] = (value - r0[offset + row]) / step;
                }
                xp[c] = x[c];
            }
        }
        j
    }
}
