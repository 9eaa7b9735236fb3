//! Planar polygon helpers over `f64` points.
//!
//! Contours traced on the pixel grid are handled by `imageproc::geometry`;
//! these cover the floating-point polygons that come out of homographies
//! and box fitting.
//!
//! Winding convention: image coordinates have `y` pointing down, and every
//! polygon produced here has a positive shoelace area, which is clockwise
//! on screen.

use nalgebra::Point2;

#[inline]
fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Signed shoelace area; positive for clockwise-on-screen polygons.
pub fn signed_area(points: &[Point2<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    let mut prev = points[points.len() - 1];
    for p in points {
        acc += prev.x * p.y - p.x * prev.y;
        prev = *p;
    }
    0.5 * acc
}

pub fn area(points: &[Point2<f64>]) -> f64 {
    signed_area(points).abs()
}

/// Convex hull via the monotone chain.
///
/// Collinear points are dropped, the start vertex is the lowest `x` (then
/// lowest `y`) point and the winding is clockwise on screen. Feeding the
/// output back in returns the same vertex sequence.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points
        .iter()
        .copied()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();

    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// True when every turn has the same sign and no edge is degenerate.
pub fn is_convex(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0_f64;
    for i in 0..n {
        let c = cross(&points[i], &points[(i + 1) % n], &points[(i + 2) % n]);
        if c == 0.0 {
            return false;
        }
        if sign == 0.0 {
            sign = c.signum();
        } else if c.signum() != sign {
            return false;
        }
    }
    true
}
