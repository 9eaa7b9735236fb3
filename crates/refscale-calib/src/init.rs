//! Linear initial guesses: intrinsics from plane homographies and per-view
//! board poses.

use crate::camera::CameraIntrinsics;
use nalgebra::{
    DMatrix, Isometry3, Matrix2, Matrix3, Rotation3, SVector, Translation3, UnitQuaternion,
    Vector2, Vector3,
};

/// Zhang's `v_ij` row built from homography columns `i` and `j`.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed-form intrinsics (skew dropped) from three or more
/// board-to-image homographies.
///
/// Returns `None` for degenerate view sets, such as all boards parallel.
pub fn intrinsics_from_homographies(homographies: &[Matrix3<f64>]) -> Option<CameraIntrinsics> {
    if homographies.len() < 3 {
        return None;
    }

    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        // scale-normalise so every view weighs the same
        let h = h / h.norm();
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        let v12 = v_ij(&h, 0, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let mut b = v_t.row(min_idx).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) || b11 <= 0.0 {
        return None;
    }

    let cy = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + cy * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 {
        return None;
    }

    let fx = (lambda / b11).sqrt();
    let fy = (lambda * b11 / denom).sqrt();
    let skew = -b12 * fx * fx * fy / lambda;
    let cx = skew * cy / fy - b13 * fx * fx / lambda;

    let intr = CameraIntrinsics { fx, fy, cx, cy };
    [fx, fy, cx, cy]
        .iter()
        .all(|v| v.is_finite())
        .then_some(intr)
}

/// Focal lengths from the orthogonality constraints with the principal
/// point fixed at the image centre.
///
/// Works from a single view. When the per-axis solve is not positive the
/// focal lengths fall back to a shared value, and finally to the larger
/// image side.
pub fn intrinsics_with_centered_principal_point(
    homographies: &[Matrix3<f64>],
    width: u32,
    height: u32,
) -> CameraIntrinsics {
    let cx = (f64::from(width) - 1.0) * 0.5;
    let cy = (f64::from(height) - 1.0) * 0.5;
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    // unknowns a = 1/fx^2, b = 1/fy^2
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();
    let mut shared_num = 0.0;
    let mut shared_den = 0.0;
    for h in homographies {
        let h = shift * h;
        let h = h / h.norm();
        let (h1, h2) = (h.column(0), h.column(1));
        let rows = [
            (
                Vector2::new(h1[0] * h2[0], h1[1] * h2[1]),
                -h1[2] * h2[2],
            ),
            (
                Vector2::new(h1[0] * h1[0] - h2[0] * h2[0], h1[1] * h1[1] - h2[1] * h2[1]),
                -(h1[2] * h1[2] - h2[2] * h2[2]),
            ),
        ];
        for (a, rhs) in rows {
            ata += a * a.transpose();
            atb += a * rhs;
            let s = a[0] + a[1];
            shared_num += s * rhs;
            shared_den += s * s;
        }
    }

    let fallback = f64::from(width.max(height));
    let from_inv_sq = |v: f64| (v > 0.0 && v.is_finite()).then(|| 1.0 / v.sqrt());

    let per_axis = ata
        .try_inverse()
        .map(|inv| inv * atb)
        .and_then(|ab| Some((from_inv_sq(ab[0])?, from_inv_sq(ab[1])?)));
    let (fx, fy) = match per_axis {
        Some((fx, fy)) if fx / fy < 4.0 && fy / fx < 4.0 => (fx, fy),
        _ => {
            let f = (shared_den > 0.0)
                .then(|| shared_num / shared_den)
                .and_then(from_inv_sq)
                .unwrap_or(fallback);
            (f, f)
        }
    };

    CameraIntrinsics { fx, fy, cx, cy }
}

/// Board-to-camera pose from a plane homography and intrinsics.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let k_inv = k.try_inverse()?;
    let a1 = k_inv * h.column(0);
    let a2 = k_inv * h.column(1);
    let a3 = k_inv * h.column(2);

    let mean_norm = 0.5 * (a1.norm() + a2.norm());
    if mean_norm < 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / mean_norm;
    // the board must sit in front of the camera
    if a3[2] * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1: Vector3<f64> = a1 * lambda;
    let r2: Vector3<f64> = a2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    // nearest rotation in the Frobenius sense
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    let t: Vector3<f64> = a3 * lambda;
    Some(Isometry3::from_parts(Translation3::from(t), rotation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k() -> Matrix3<f64> {
        CameraIntrinsics {
            fx: 900.0,
            fy: 880.0,
            cx: 320.0,
            cy: 240.0,
        }
        .k_matrix()
    }

    fn homography(k: &Matrix3<f64>, rot: Vector3<f64>, t: Vector3<f64>) -> Matrix3<f64> {
        let r = Rotation3::from_scaled_axis(rot);
        let m = r.matrix();
        let h = Matrix3::from_columns(&[k * m.column(0), k * m.column(1), k * t]);
        h / h[(2, 2)]
    }

    fn views(k: &Matrix3<f64>) -> Vec<Matrix3<f64>> {
        vec![
            homography(k, Vector3::new(0.3, 0.0, 0.05), Vector3::new(-80.0, -60.0, 700.0)),
            homography(k, Vector3::new(-0.1, 0.35, -0.1), Vector3::new(-70.0, -50.0, 650.0)),
            homography(k, Vector3::new(0.2, -0.25, 0.3), Vector3::new(-90.0, -40.0, 800.0)),
        ]
    }

    #[test]
    fn zhang_recovers_intrinsics() {
        let k = k();
        let intr = intrinsics_from_homographies(&views(&k)).expect("solvable");
        assert!((intr.fx - 900.0).abs() < 0.5, "fx {}", intr.fx);
        assert!((intr.fy - 880.0).abs() < 0.5, "fy {}", intr.fy);
        assert!((intr.cx - 320.0).abs() < 0.5, "cx {}", intr.cx);
        assert!((intr.cy - 240.0).abs() < 0.5, "cy {}", intr.cy);
    }

    #[test]
    fn zhang_needs_three_views() {
        let k = k();
        assert!(intrinsics_from_homographies(&views(&k)[..2]).is_none());
    }

    #[test]
    fn centred_principal_point_recovers_focal_lengths() {
        let k = CameraIntrinsics {
            fx: 850.0,
            fy: 840.0,
            cx: 319.5,
            cy: 239.5,
        }
        .k_matrix();
        let intr = intrinsics_with_centered_principal_point(&views(&k), 640, 480);
        assert!((intr.fx - 850.0).abs() < 0.5, "fx {}", intr.fx);
        assert!((intr.fy - 840.0).abs() < 0.5, "fy {}", intr.fy);
        assert_eq!((intr.cx, intr.cy), (319.5, 239.5));
    }

    #[test]
    fn pose_is_recovered_from_homography() {
        let k = k();
        let rot = Vector3::new(0.15, -0.2, 0.1);
        let t = Vector3::new(-40.0, 25.0, 500.0);
        // flip the overall sign to exercise the in-front check
        let h = -homography(&k, rot, t);
        let pose = pose_from_homography(&k, &h).expect("pose");
        assert!((pose.translation.vector - t).norm() < 1e-6);
        let r_err = pose.rotation.to_rotation_matrix().matrix() - Rotation3::from_scaled_axis(rot).matrix();
        assert!(r_err.norm() < 1e-9);
    }
}
