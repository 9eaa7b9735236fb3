use crate::polygon::signed_area;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QuadError {
    #[error("quad has non-finite corner coordinates")]
    NonFinite,
    #[error("quad area {area:.3} px^2 is below the minimum {min_area:.3} px^2")]
    Degenerate { area: f64, min_area: f64 },
    #[error("quad is not strictly convex")]
    NotConvex,
    #[error("quad corners are not in clockwise TL, TR, BR, BL order")]
    WrongWinding,
}

/// Four image points in the fixed order top-left, top-right, bottom-right,
/// bottom-left (clockwise on screen).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point2<f64>; 4],
}

impl Quad {
    /// Wrap corners that are already in TL, TR, BR, BL order.
    pub fn new(corners: [Point2<f64>; 4]) -> Self {
        Self { corners }
    }

    /// Order four arbitrary points as TL, TR, BR, BL.
    ///
    /// Points are sorted clockwise around their centroid, then rotated so the
    /// corner with the smallest `x + y` comes first.
    pub fn from_unordered(points: [Point2<f64>; 4]) -> Self {
        let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

        let mut pts = points;
        pts.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.total_cmp(&tb)
        });

        let start = (0..4)
            .min_by(|&i, &j| (pts[i].x + pts[i].y).total_cmp(&(pts[j].x + pts[j].y)))
            .unwrap_or(0);
        pts.rotate_left(start);
        Self { corners: pts }
    }

    pub fn top_left(&self) -> Point2<f64> {
        self.corners[0]
    }

    /// Signed area; positive for the expected clockwise-on-screen order.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.corners)
    }

    /// Mean length of the top and bottom edges.
    pub fn mean_horizontal_edge(&self) -> f64 {
        let [tl, tr, br, bl] = self.corners;
        0.5 * ((tr - tl).norm() + (br - bl).norm())
    }

    /// Mean length of the left and right edges.
    pub fn mean_vertical_edge(&self) -> f64 {
        let [tl, tr, br, bl] = self.corners;
        0.5 * ((bl - tl).norm() + (br - tr).norm())
    }

    /// Check the invariants a rectifying homography relies on.
    pub fn validate(&self, min_area: f64) -> Result<(), QuadError> {
        if self
            .corners
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(QuadError::NonFinite);
        }

        let area = self.signed_area();
        if area.abs() <= min_area.max(0.0) {
            return Err(QuadError::Degenerate {
                area: area.abs(),
                min_area,
            });
        }

        let turns: Vec<f64> = (0..4)
            .map(|i| {
                let a = self.corners[i];
                let b = self.corners[(i + 1) % 4];
                let c = self.corners[(i + 2) % 4];
                (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
            })
            .collect();

        let positive = turns.iter().filter(|&&t| t > 0.0).count();
        let negative = turns.iter().filter(|&&t| t < 0.0).count();
        match (positive, negative) {
            (4, 0) => Ok(()),
            (0, 4) => Err(QuadError::WrongWinding),
            _ => Err(QuadError::NotConvex),
        }
    }
}
