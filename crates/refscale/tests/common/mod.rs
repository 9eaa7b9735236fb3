#![allow(dead_code)]

use image::{Rgb, RgbImage};
use nalgebra::Point2;
use refscale_core::homography_from_4pt;

pub const PAPER: [u8; 3] = [236, 233, 228];
pub const TABLE: [u8; 3] = [72, 64, 58];
pub const INK: [u8; 3] = [12, 12, 12];

/// Rotated rectangle in sheet millimetres.
#[derive(Clone, Copy, Debug)]
pub struct Shape {
    pub center: (f64, f64),
    pub size: (f64, f64),
    pub angle_deg: f64,
    pub color: [u8; 3],
}

impl Shape {
    pub fn rect(center: (f64, f64), size: (f64, f64), angle_deg: f64) -> Self {
        Self {
            center,
            size,
            angle_deg,
            color: INK,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        let t = self.angle_deg.to_radians();
        let (dx, dy) = (x - self.center.0, y - self.center.1);
        let u = dx * t.cos() + dy * t.sin();
        let v = -dx * t.sin() + dy * t.cos();
        u.abs() <= 0.5 * self.size.0 && v.abs() <= 0.5 * self.size.1
    }
}

/// A4 sheet seen through a homography, with shapes lying on it.
pub struct Scene {
    pub width: u32,
    pub height: u32,
    /// Sheet corners in the image, TL TR BR BL.
    pub sheet: [Point2<f64>; 4],
    pub sheet_mm: (f64, f64),
    pub shapes: Vec<Shape>,
}

impl Scene {
    /// Sheet seen straight on at `px_per_mm`, with `margin` pixels of table.
    pub fn fronto_parallel(px_per_mm: f64, margin: f64, shapes: Vec<Shape>) -> Self {
        let (w, h) = (210.0 * px_per_mm, 297.0 * px_per_mm);
        Self {
            width: (w + 2.0 * margin).ceil() as u32,
            height: (h + 2.0 * margin).ceil() as u32,
            sheet: [
                Point2::new(margin, margin),
                Point2::new(margin + w, margin),
                Point2::new(margin + w, margin + h),
                Point2::new(margin, margin + h),
            ],
            sheet_mm: (210.0, 297.0),
            shapes,
        }
    }

    pub fn render(&self) -> RgbImage {
        let (sw, sh) = self.sheet_mm;
        let mm = [
            Point2::new(0.0, 0.0),
            Point2::new(sw, 0.0),
            Point2::new(sw, sh),
            Point2::new(0.0, sh),
        ];
        let sheet_from_image = homography_from_4pt(&self.sheet, &mm).expect("sheet homography");
        let shade = |x: f64, y: f64| -> [u8; 3] {
            let p = sheet_from_image.apply(Point2::new(x, y));
            if p.x < 0.0 || p.y < 0.0 || p.x > sw || p.y > sh {
                return TABLE;
            }
            self.shapes
                .iter()
                .find(|s| s.contains(p.x, p.y))
                .map_or(PAPER, |s| s.color)
        };
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let mut acc = [0u32; 3];
            for (dx, dy) in [(-0.25, -0.25), (0.25, -0.25), (-0.25, 0.25), (0.25, 0.25)] {
                let c = shade(f64::from(x) + dx, f64::from(y) + dy);
                for (a, v) in acc.iter_mut().zip(c) {
                    *a += u32::from(v);
                }
            }
            Rgb(acc.map(|a| ((a + 2) / 4) as u8))
        })
    }
}

pub fn assert_close_rel(actual: f64, expected: f64, rel: f64, what: &str) {
    let err = (actual - expected).abs() / expected.abs();
    assert!(
        err <= rel,
        "{what}: {actual:.3} vs {expected:.3} ({:.2}% > {:.2}%)",
        err * 100.0,
        rel * 100.0
    );
}
