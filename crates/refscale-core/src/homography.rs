//! Planar homographies and their estimation from point matches.
//!
//! Both estimators work on conditioned coordinates (centroid at the origin,
//! mean radius `sqrt(2)`) and return matrices scaled so that `h[(2, 2)] == 1`.

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

/// Planar projective transform, `dst ~ h * src`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Row-major construction.
    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        std::array::from_fn(|r| std::array::from_fn(|c| self.h[(r, c)]))
    }

    /// Map a point; a point on the vanishing line comes back non-finite.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let q = self.h * p.to_homogeneous();
        Point2::new(q.x / q.z, q.y / q.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity moving a point set to a well-conditioned frame.
#[derive(Clone, Copy, Debug)]
struct Conditioner {
    centroid: Vector2<f64>,
    scale: f64,
}

impl Conditioner {
    fn fit(pts: &[Point2<f64>]) -> Self {
        let n = pts.len().max(1) as f64;
        let centroid = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
        let radius = pts.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n;
        let scale = if radius > 1e-12 { SQRT_2 / radius } else { 1.0 };
        Self { centroid, scale }
    }

    fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::from((p.coords - self.centroid) * self.scale)
    }

    fn matrix(&self) -> Matrix3<f64> {
        let (s, c) = (self.scale, self.centroid);
        Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        let (s, c) = (self.scale, self.centroid);
        Matrix3::new(1.0 / s, 0.0, c.x, 0.0, 1.0 / s, c.y, 0.0, 0.0, 1.0)
    }
}

/// The two DLT rows one match `(x, y) -> (u, v)` contributes to `A h = 0`.
fn match_rows(p: Point2<f64>, q: Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y, u, v) = (p.x, p.y, q.x, q.y);
    [
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
        [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
    ]
}

/// True when three of the four (conditioned) points are nearly collinear.
fn has_collinear_triple(pts: &[Point2<f64>; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[i, j, k]| {
        let (u, v) = (pts[j] - pts[i], pts[k] - pts[i]);
        (u.x * v.y - u.y * v.x).abs() < 1e-9
    })
}

/// Map a homography found between conditioned sets back to the original
/// coordinates.
fn uncondition(hn: Matrix3<f64>, src: &Conditioner, dst: &Conditioner) -> Option<Homography> {
    let h = dst.inverse_matrix() * hn * src.matrix();
    let w = h[(2, 2)];
    (w.is_finite() && w.abs() > 1e-12).then(|| Homography::new(h / w))
}

/// Estimate H with `dst ~ H * src` from four or more matches.
///
/// Four matches are solved exactly by [`homography_from_4pt`]; more are
/// fitted in the least-squares sense through the SVD of the DLT system.
/// `None` for mismatched or too short inputs and degenerate configurations.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (<&[_; 4]>::try_from(src), <&[_; 4]>::try_from(dst)) {
        return homography_from_4pt(s, d);
    }

    let (cs, cd) = (Conditioner::fit(src), Conditioner::fit(dst));
    let rows: Vec<[f64; 9]> = src
        .iter()
        .zip(dst)
        .flat_map(|(p, q)| match_rows(cs.apply(p), cd.apply(q)))
        .collect();
    let a = DMatrix::from_fn(rows.len(), 9, |r, c| rows[r][c]);

    // the null vector is the right singular vector of the least singular value
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.argmin().0;
    let hn = Matrix3::from_fn(|r, c| v_t[(smallest, 3 * r + c)]);
    uncondition(hn, &cs, &cd)
}

/// H with `dst ~ H * src` from exactly four matches, in the same corner
/// order on both sides. `None` when three of the points are collinear.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let (cs, cd) = (Conditioner::fit(src), Conditioner::fit(dst));
    let (sn, dn) = (src.map(|p| cs.apply(&p)), dst.map(|p| cd.apply(&p)));
    if has_collinear_triple(&sn) || has_collinear_triple(&dn) {
        return None;
    }

    // fixing h33 = 1 leaves eight unknowns for eight equations
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (p, q)) in sn.into_iter().zip(dn).enumerate() {
        for (i, row) in match_rows(p, q).iter().enumerate() {
            let r = 2 * k + i;
            for (c, &v) in row[..8].iter().enumerate() {
                a[(r, c)] = v;
            }
            b[r] = -row[8];
        }
    }

    let x = a.lu().solve(&b)?;
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let hn = Matrix3::from_fn(|r, c| if r == 2 && c == 2 { 1.0 } else { x[3 * r + c] });
    uncondition(hn, &cs, &cd)
}
