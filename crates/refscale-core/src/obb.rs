use crate::polygon::convex_hull;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Minimum-area rectangle around a point set.
///
/// `angle` is the direction of the `width` side in radians (image axes,
/// `y` down). Before [`OrientedBoundingBox::canonical`] is applied, which
/// side is called `width` is an artefact of the fitting procedure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientedBoundingBox {
    pub center: Point2<f64>,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
}

impl OrientedBoundingBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Same box with the longer side reported as `width`.
    ///
    /// The angle is wrapped into `(-pi/2, pi/2]`.
    pub fn canonical(&self) -> Self {
        let (width, height, angle) = if self.height > self.width {
            (self.height, self.width, self.angle + FRAC_PI_2)
        } else {
            (self.width, self.height, self.angle)
        };
        Self {
            center: self.center,
            width,
            height,
            angle: wrap_half_turn(angle),
        }
    }

    /// Same box with every side pushed outwards by `margin`.
    pub fn grown(&self, margin: f64) -> Self {
        Self {
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
            ..*self
        }
    }

    /// `(longer, shorter)` side lengths.
    pub fn sides(&self) -> (f64, f64) {
        let c = self.canonical();
        (c.width, c.height)
    }

    /// Box corners, clockwise on screen.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let u = Vector2::new(self.angle.cos(), self.angle.sin()) * (0.5 * self.width);
        let v = Vector2::new(-self.angle.sin(), self.angle.cos()) * (0.5 * self.height);
        let c = self.center;
        [c - u - v, c + u - v, c + u + v, c - u + v]
    }
}

fn wrap_half_turn(angle: f64) -> f64 {
    let mut a = angle.rem_euclid(PI);
    if a > FRAC_PI_2 {
        a -= PI;
    }
    a
}

/// Fit the minimum-area enclosing rectangle with rotating calipers.
///
/// Returns `None` for an empty input. One or two distinct points give a
/// zero-height box.
pub fn min_area_rect(points: &[Point2<f64>]) -> Option<OrientedBoundingBox> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => None,
        1 => Some(OrientedBoundingBox {
            center: hull[0],
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        }),
        2 => {
            let d = hull[1] - hull[0];
            Some(OrientedBoundingBox {
                center: nalgebra::center(&hull[0], &hull[1]),
                width: d.norm(),
                height: 0.0,
                angle: d.y.atan2(d.x),
            })
        }
        n => {
            let mut best: Option<(f64, OrientedBoundingBox)> = None;
            for i in 0..n {
                let edge = hull[(i + 1) % n] - hull[i];
                let len = edge.norm();
                if len < 1e-12 {
                    continue;
                }
                let u = edge / len;
                let v = Vector2::new(-u.y, u.x);

                let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
                let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
                for p in &hull {
                    let r = p.coords;
                    let pu = r.dot(&u);
                    let pv = r.dot(&v);
                    min_u = min_u.min(pu);
                    max_u = max_u.max(pu);
                    min_v = min_v.min(pv);
                    max_v = max_v.max(pv);
                }

                let area = (max_u - min_u) * (max_v - min_v);
                if best.as_ref().is_none_or(|(a, _)| area < *a) {
                    let center = u * (0.5 * (min_u + max_u)) + v * (0.5 * (min_v + max_v));
                    best = Some((
                        area,
                        OrientedBoundingBox {
                            center: Point2::from(center),
                            width: max_u - min_u,
                            height: max_v - min_v,
                            angle: u.y.atan2(u.x),
                        },
                    ));
                }
            }
            best.map(|(_, obb)| obb)
        }
    }
}
