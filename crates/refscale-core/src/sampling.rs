//! Bilinear sampling and perspective warping over `image` buffers.
//!
//! Pixel `(i, j)` is centred at the integer coordinate `(i, j)`. Taps that
//! fall outside the source contribute zero, so anything sampled beyond the
//! image border fades to black.

use crate::homography::Homography;
use image::{ImageBuffer, Pixel};
use nalgebra::Point2;

/// 8-bit image buffer with any pixel layout of up to four channels.
pub type Image8<P> = ImageBuffer<P, Vec<u8>>;

const MAX_CHANNELS: usize = 4;

#[inline]
fn tap<P>(src: &Image8<P>, x: i64, y: i64) -> Option<&P>
where
    P: Pixel<Subpixel = u8>,
{
    if x < 0 || y < 0 || x >= src.width() as i64 || y >= src.height() as i64 {
        return None;
    }
    Some(src.get_pixel(x as u32, y as u32))
}

/// Bilinear interpolation at a sub-pixel location.
pub fn sample_bilinear<P>(src: &Image8<P>, x: f64, y: f64) -> P
where
    P: Pixel<Subpixel = u8>,
{
    let channels = (P::CHANNEL_COUNT as usize).min(MAX_CHANNELS);
    let mut out = [0u8; MAX_CHANNELS];
    if !x.is_finite() || !y.is_finite() {
        return *P::from_slice(&out[..channels]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (xi, yi) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; MAX_CHANNELS];
    for (dx, dy, w) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        if w <= 0.0 {
            continue;
        }
        if let Some(px) = tap(src, xi + dx, yi + dy) {
            for (a, v) in acc.iter_mut().zip(px.channels()) {
                *a += w * f64::from(*v);
            }
        }
    }

    for (o, a) in out.iter_mut().zip(acc).take(channels) {
        *o = a.round().clamp(0.0, 255.0) as u8;
    }
    *P::from_slice(&out[..channels])
}

/// Build a `width x height` image whose pixel `p` is sampled from `src` at
/// `src_from_dst.apply(p)`.
pub fn warp_perspective<P>(
    src: &Image8<P>,
    src_from_dst: &Homography,
    width: u32,
    height: u32,
) -> Image8<P>
where
    P: Pixel<Subpixel = u8>,
{
    ImageBuffer::from_fn(width, height, |x, y| {
        let q = src_from_dst.apply(Point2::new(f64::from(x), f64::from(y)));
        sample_bilinear(src, q.x, q.y)
    })
}

/// Generic remap: `map(x, y)` returns the source location for output `(x, y)`.
pub fn remap<P, F>(src: &Image8<P>, width: u32, height: u32, map: F) -> Image8<P>
where
    P: Pixel<Subpixel = u8>,
    F: Fn(u32, u32) -> Option<Point2<f64>>,
{
    ImageBuffer::from_fn(width, height, |x, y| match map(x, y) {
        Some(q) => sample_bilinear(src, q.x, q.y),
        None => sample_bilinear(src, f64::NAN, f64::NAN),
    })
}
