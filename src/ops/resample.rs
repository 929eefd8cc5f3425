// ============================================================================
// RESAMPLING KERNELS - pixel-art aware resize / rotate on BGRA buffers
// ============================================================================
//
// Every kernel is total: zero-sized or short input yields an empty buffer.
// Rows are written in parallel with rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::PixelBuffer;

/// Resampling used when a floating selection is scaled or rotated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Hard edges, no new colours.
    #[default]
    Nearest,
    Bilinear,
    /// EPX upscaling for enlargements, nearest rotation.
    Smooth2x,
    /// EPX 2x, bilinear rotate, nearest downsample.
    RotSprite,
}

impl Interpolation {
    pub fn label(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "Nearest Neighbor",
            Interpolation::Bilinear => "Bilinear",
            Interpolation::Smooth2x => "Smooth 2x",
            Interpolation::RotSprite => "RotSprite",
        }
    }

    pub fn all() -> &'static [Interpolation] {
        &[
            Interpolation::Nearest,
            Interpolation::Bilinear,
            Interpolation::Smooth2x,
            Interpolation::RotSprite,
        ]
    }
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "bilinear" => Ok(Interpolation::Bilinear),
            "smooth2x" | "smooth_2x" | "epx" => Ok(Interpolation::Smooth2x),
            "rotsprite" | "rot_sprite" => Ok(Interpolation::RotSprite),
            other => Err(format!("unknown interpolation '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
//  Helpers
// ---------------------------------------------------------------------------

fn valid(src: &[u8], w: u32, h: u32) -> bool {
    w > 0 && h > 0 && src.len() >= w as usize * h as usize * 4
}

#[inline]
fn px_u32(src: &[u8], w: u32, x: u32, y: u32) -> u32 {
    let i = (y as usize * w as usize + x as usize) * 4;
    u32::from_le_bytes([src[i], src[i + 1], src[i + 2], src[i + 3]])
}

/// Neighbour read with clamp-to-edge.
#[inline]
fn px_clamped(src: &[u8], w: u32, h: u32, x: i64, y: i64) -> u32 {
    let cx = x.clamp(0, w as i64 - 1) as u32;
    let cy = y.clamp(0, h as i64 - 1) as u32;
    px_u32(src, w, cx, cy)
}

#[inline]
fn put_u32(row: &mut [u8], x: usize, v: u32) {
    row[x * 4..x * 4 + 4].copy_from_slice(&v.to_le_bytes());
}

// ---------------------------------------------------------------------------
//  Resize
// ---------------------------------------------------------------------------

/// Integer index mapping. Hard edges survive.
pub fn resize_nearest(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> PixelBuffer {
    if !valid(src, sw, sh) || dw == 0 || dh == 0 {
        return PixelBuffer::empty();
    }
    let row_bytes = dw as usize * 4;
    let mut out = vec![0u8; row_bytes * dh as usize];
    out.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        let sy = ((y as u64 * sh as u64) / dh as u64) as u32;
        for x in 0..dw as usize {
            let sx = ((x as u64 * sw as u64) / dw as u64) as u32;
            put_u32(row, x, px_u32(src, sw, sx, sy));
        }
    });
    PixelBuffer::from_parts(dw, dh, out)
}

/// Four-neighbour blend with clamp-to-edge. Colour is weighted by alpha so
/// transparent neighbours do not darken edges.
pub fn resize_bilinear(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> PixelBuffer {
    if !valid(src, sw, sh) || dw == 0 || dh == 0 {
        return PixelBuffer::empty();
    }
    let row_bytes = dw as usize * 4;
    let mut out = vec![0u8; row_bytes * dh as usize];
    let x_ratio = sw as f64 / dw as f64;
    let y_ratio = sh as f64 / dh as f64;
    let stride = sw as usize * 4;

    out.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        let fy = ((y as f64 + 0.5) * y_ratio - 0.5).clamp(0.0, (sh - 1) as f64);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(sh as usize - 1);
        let ty = fy - y0 as f64;

        for x in 0..dw as usize {
            let fx = ((x as f64 + 0.5) * x_ratio - 0.5).clamp(0.0, (sw - 1) as f64);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(sw as usize - 1);
            let tx = fx - x0 as f64;

            let taps = [
                (y0 * stride + x0 * 4, (1.0 - tx) * (1.0 - ty)),
                (y0 * stride + x1 * 4, tx * (1.0 - ty)),
                (y1 * stride + x0 * 4, (1.0 - tx) * ty),
                (y1 * stride + x1 * 4, tx * ty),
            ];

            let mut alpha = 0.0f64;
            let mut colour = [0.0f64; 3];
            for (idx, w) in taps {
                let a = src[idx + 3] as f64 * w;
                alpha += a;
                for c in 0..3 {
                    colour[c] += src[idx + c] as f64 * a;
                }
            }

            let px = x * 4;
            if alpha > 0.0 {
                for c in 0..3 {
                    row[px + c] = (colour[c] / alpha).round().clamp(0.0, 255.0) as u8;
                }
                row[px + 3] = alpha.round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    PixelBuffer::from_parts(dw, dh, out)
}

// ---------------------------------------------------------------------------
//  Edge-preserving 2x upscalers
// ---------------------------------------------------------------------------
//
// Neighbourhood naming:
//   A B C
//   D E F
//   G H I

/// EPX: each source pixel becomes a 2x2 quad. A corner takes the colour of
/// its two adjacent edge neighbours when they agree and the opposite pair
/// does not; three or more equal neighbours keep the centre everywhere.
pub fn epx_2x(src: &[u8], w: u32, h: u32) -> PixelBuffer {
    if !valid(src, w, h) {
        return PixelBuffer::empty();
    }
    let (ow, oh) = (w * 2, h * 2);
    let row_bytes = ow as usize * 4;
    let mut out = vec![0u8; row_bytes * oh as usize];

    // Two output rows per source row.
    out.par_chunks_mut(row_bytes * 2).enumerate().for_each(|(y, rows)| {
        let (top_row, bottom_row) = rows.split_at_mut(row_bytes);
        let y = y as i64;
        for x in 0..w as i64 {
            let e = px_clamped(src, w, h, x, y);
            let b = px_clamped(src, w, h, x, y - 1);
            let d = px_clamped(src, w, h, x - 1, y);
            let f = px_clamped(src, w, h, x + 1, y);
            let hh = px_clamped(src, w, h, x, y + 1);

            let (mut e0, mut e1, mut e2, mut e3) = (e, e, e, e);
            let equal_pairs = [b == d, b == f, b == hh, d == f, d == hh, f == hh]
                .iter()
                .filter(|v| **v)
                .count();
            // Three equal neighbours produce at least three equal pairs.
            if equal_pairs < 3 {
                if d == b && d != hh && b != f {
                    e0 = b;
                }
                if b == f && b != d && f != hh {
                    e1 = f;
                }
                if hh == d && hh != f && d != b {
                    e2 = d;
                }
                if f == hh && f != b && hh != d {
                    e3 = hh;
                }
            }

            let ox = x as usize * 2;
            put_u32(top_row, ox, e0);
            put_u32(top_row, ox + 1, e1);
            put_u32(bottom_row, ox, e2);
            put_u32(bottom_row, ox + 1, e3);
        }
    });
    PixelBuffer::from_parts(ow, oh, out)
}

/// Scale2x (AdvMAME2x). Only acts when the vertical pair B/H and the
/// horizontal pair D/F both differ; otherwise the quad is the centre.
pub fn scale2x(src: &[u8], w: u32, h: u32) -> PixelBuffer {
    if !valid(src, w, h) {
        return PixelBuffer::empty();
    }
    let (ow, oh) = (w * 2, h * 2);
    let row_bytes = ow as usize * 4;
    let mut out = vec![0u8; row_bytes * oh as usize];

    out.par_chunks_mut(row_bytes * 2).enumerate().for_each(|(y, rows)| {
        let (top_row, bottom_row) = rows.split_at_mut(row_bytes);
        let y = y as i64;
        for x in 0..w as i64 {
            let e = px_clamped(src, w, h, x, y);
            let b = px_clamped(src, w, h, x, y - 1);
            let d = px_clamped(src, w, h, x - 1, y);
            let f = px_clamped(src, w, h, x + 1, y);
            let hh = px_clamped(src, w, h, x, y + 1);

            let quad = if b != hh && d != f {
                [
                    if d == b { d } else { e },
                    if b == f { f } else { e },
                    if d == hh { d } else { e },
                    if hh == f { f } else { e },
                ]
            } else {
                [e; 4]
            };

            let ox = x as usize * 2;
            put_u32(top_row, ox, quad[0]);
            put_u32(top_row, ox + 1, quad[1]);
            put_u32(bottom_row, ox, quad[2]);
            put_u32(bottom_row, ox + 1, quad[3]);
        }
    });
    PixelBuffer::from_parts(ow, oh, out)
}

// ---------------------------------------------------------------------------
//  Rotation
// ---------------------------------------------------------------------------

/// Bounding box of a `w` x `h` rectangle rotated by `deg`. A small tolerance
/// before `ceil` keeps exact quarter turns at their true size.
pub fn rotated_size(w: u32, h: u32, deg: f32) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (0, 0);
    }
    let (s, c) = (deg as f64).to_radians().sin_cos();
    let (s, c) = (s.abs(), c.abs());
    let (w, h) = (w as f64, h as f64);
    let nw = (w * c + h * s - 1e-3).ceil().max(1.0) as u32;
    let nh = (w * s + h * c - 1e-3).ceil().max(1.0) as u32;
    (nw, nh)
}

/// Inverse map from an output pixel centre to source coordinates (relative
/// to the source top-left). Rotation is about the buffer centres.
struct RotationMap {
    sin: f64,
    cos: f64,
    src_cx: f64,
    src_cy: f64,
    dst_cx: f64,
    dst_cy: f64,
}

impl RotationMap {
    fn new(w: u32, h: u32, nw: u32, nh: u32, deg: f32) -> Self {
        let (sin, cos) = (deg as f64).to_radians().sin_cos();
        Self {
            sin,
            cos,
            src_cx: w as f64 / 2.0,
            src_cy: h as f64 / 2.0,
            dst_cx: nw as f64 / 2.0,
            dst_cy: nh as f64 / 2.0,
        }
    }

    #[inline]
    fn source_of(&self, x: usize, y: usize) -> (f64, f64) {
        let dx = x as f64 + 0.5 - self.dst_cx;
        let dy = y as f64 + 0.5 - self.dst_cy;
        (
            self.cos * dx + self.sin * dy + self.src_cx,
            -self.sin * dx + self.cos * dy + self.src_cy,
        )
    }
}

pub fn rotate_nearest(src: &[u8], w: u32, h: u32, deg: f32) -> PixelBuffer {
    if !valid(src, w, h) {
        return PixelBuffer::empty();
    }
    let (nw, nh) = rotated_size(w, h, deg);
    let map = RotationMap::new(w, h, nw, nh, deg);
    let row_bytes = nw as usize * 4;
    let mut out = vec![0u8; row_bytes * nh as usize];

    out.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        for x in 0..nw as usize {
            let (sx, sy) = map.source_of(x, y);
            let (ix, iy) = (sx.floor(), sy.floor());
            if ix < 0.0 || iy < 0.0 || ix >= w as f64 || iy >= h as f64 {
                continue;
            }
            put_u32(row, x, px_u32(src, w, ix as u32, iy as u32));
        }
    });
    PixelBuffer::from_parts(nw, nh, out)
}

/// Bilinear rotation in premultiplied space. The result is premultiplied;
/// run [`unpremultiply`] on it before use.
pub fn rotate_bilinear(src: &[u8], w: u32, h: u32, deg: f32) -> PixelBuffer {
    if !valid(src, w, h) {
        return PixelBuffer::empty();
    }
    let (nw, nh) = rotated_size(w, h, deg);
    let map = RotationMap::new(w, h, nw, nh, deg);
    let row_bytes = nw as usize * 4;
    let mut out = vec![0u8; row_bytes * nh as usize];
    let stride = w as usize * 4;

    let sample = |sx: i64, sy: i64| -> [f64; 4] {
        if sx < 0 || sy < 0 || sx >= w as i64 || sy >= h as i64 {
            return [0.0; 4];
        }
        let i = sy as usize * stride + sx as usize * 4;
        let a = src[i + 3] as f64;
        [
            src[i] as f64 * a / 255.0,
            src[i + 1] as f64 * a / 255.0,
            src[i + 2] as f64 * a / 255.0,
            a,
        ]
    };

    out.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        for x in 0..nw as usize {
            let (sx, sy) = map.source_of(x, y);
            let fx = sx - 0.5;
            let fy = sy - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            if x0 < -1.0 || y0 < -1.0 || x0 >= w as f64 || y0 >= h as f64 {
                continue;
            }
            let tx = fx - x0;
            let ty = fy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let tl = sample(x0, y0);
            let tr = sample(x0 + 1, y0);
            let bl = sample(x0, y0 + 1);
            let br = sample(x0 + 1, y0 + 1);

            let px = x * 4;
            for c in 0..4 {
                let top = tl[c] + (tr[c] - tl[c]) * tx;
                let bot = bl[c] + (br[c] - bl[c]) * tx;
                row[px + c] = (top + (bot - top) * ty).round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    PixelBuffer::from_parts(nw, nh, out)
}

pub fn premultiply(bgra: &mut [u8]) {
    bgra.par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        for c in px.iter_mut().take(3) {
            *c = ((*c as u32 * a + 127) / 255) as u8;
        }
    });
}

pub fn unpremultiply(bgra: &mut [u8]) {
    bgra.par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            return;
        }
        for c in px.iter_mut().take(3) {
            *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    });
}

/// RotSprite-style rotation: EPX 2x, bilinear rotate, unpremultiply, then a
/// nearest downsample to the rotated size of the original.
pub fn rotate_sprite_approx(src: &[u8], w: u32, h: u32, deg: f32) -> PixelBuffer {
    if !valid(src, w, h) {
        return PixelBuffer::empty();
    }
    let up = epx_2x(src, w, h);
    let rotated = rotate_bilinear(up.bytes(), up.width(), up.height(), deg);
    let (rw, rh) = (rotated.width(), rotated.height());
    let mut bytes = rotated.into_bytes();
    unpremultiply(&mut bytes);
    let (tw, th) = rotated_size(w, h, deg);
    resize_nearest(&bytes, rw, rh, tw, th)
}

// ---------------------------------------------------------------------------
//  Floating-selection pipeline
// ---------------------------------------------------------------------------

/// Scale `src` by `(sx, sy)`, then rotate it by `deg`, with the kernels
/// picked by `interp`.
pub fn transform_buffer(src: &PixelBuffer, sx: f32, sy: f32, deg: f32, interp: Interpolation) -> PixelBuffer {
    if src.is_empty() {
        return PixelBuffer::empty();
    }
    let (sw, sh) = (src.width(), src.height());
    let tw = ((sw as f32 * sx).round() as u32).max(1);
    let th = ((sh as f32 * sy).round() as u32).max(1);

    let scaled = if (tw, th) == (sw, sh) {
        src.clone()
    } else {
        match interp {
            Interpolation::Nearest | Interpolation::RotSprite => {
                resize_nearest(src.bytes(), sw, sh, tw, th)
            }
            Interpolation::Bilinear => resize_bilinear(src.bytes(), sw, sh, tw, th),
            Interpolation::Smooth2x => {
                let mut cur = src.clone();
                while cur.width() * 2 <= tw && cur.height() * 2 <= th {
                    cur = epx_2x(cur.bytes(), cur.width(), cur.height());
                }
                if (cur.width(), cur.height()) == (tw, th) {
                    cur
                } else {
                    resize_nearest(cur.bytes(), cur.width(), cur.height(), tw, th)
                }
            }
        }
    };

    if deg.abs() < 1e-4 {
        return scaled;
    }
    let (w, h) = (scaled.width(), scaled.height());
    match interp {
        Interpolation::Nearest | Interpolation::Smooth2x => rotate_nearest(scaled.bytes(), w, h, deg),
        Interpolation::Bilinear => {
            let rotated = rotate_bilinear(scaled.bytes(), w, h, deg);
            let (rw, rh) = (rotated.width(), rotated.height());
            let mut bytes = rotated.into_bytes();
            unpremultiply(&mut bytes);
            PixelBuffer::from_parts(rw, rh, bytes)
        }
        Interpolation::RotSprite => rotate_sprite_approx(scaled.bytes(), w, h, deg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [0, 0, 255, 255];
    const BLUE: [u8; 4] = [255, 0, 0, 255];

    fn buffer(w: u32, h: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        for y in 0..h {
            for x in 0..w {
                buf.put_pixel(x, y, f(x, y));
            }
        }
        buf
    }

    #[test]
    fn test_zero_sized_inputs() {
        assert!(resize_nearest(&[], 0, 0, 4, 4).is_empty());
        assert!(resize_bilinear(&[], 0, 3, 4, 4).is_empty());
        assert!(resize_nearest(&[0; 16], 2, 2, 0, 3).is_empty());
        assert!(epx_2x(&[], 0, 0).is_empty());
        assert!(scale2x(&[], 0, 0).is_empty());
        assert!(rotate_nearest(&[], 0, 0, 45.0).is_empty());
        assert!(rotate_bilinear(&[], 0, 0, 45.0).is_empty());
        assert!(rotate_sprite_approx(&[], 0, 0, 45.0).is_empty());
        for interp in Interpolation::all() {
            assert!(transform_buffer(&PixelBuffer::empty(), 2.0, 2.0, 30.0, *interp).is_empty(), "{interp:?}");
        }
    }

    #[test]
    fn test_resize_nearest_keeps_colours() {
        let src = buffer(2, 1, |x, _| if x == 0 { RED } else { BLUE });
        let out = resize_nearest(src.bytes(), 2, 1, 4, 2);
        assert_eq!((out.width(), out.height()), (4, 2));
        assert_eq!(out.pixel(1, 1), RED);
        assert_eq!(out.pixel(2, 0), BLUE);
    }

    #[test]
    fn test_resize_bilinear_ignores_transparent_colour() {
        // transparent neighbour carries black; blending must not darken red
        let src = buffer(2, 1, |x, _| if x == 0 { RED } else { [0, 0, 0, 0] });
        let out = resize_bilinear(src.bytes(), 2, 1, 4, 1);
        let mid = out.pixel(1, 0);
        assert_eq!(&mid[0..3], &RED[0..3]);
        assert!(mid[3] > 0 && mid[3] < 255);
    }

    #[test]
    fn test_rotated_size_quarter_turns() {
        assert_eq!(rotated_size(4, 4, 90.0), (4, 4));
        assert_eq!(rotated_size(5, 3, 90.0), (3, 5));
        assert_eq!(rotated_size(5, 3, 180.0), (5, 3));
        assert_eq!(rotated_size(10, 10, 45.0), (15, 15));
        assert_eq!(rotated_size(0, 3, 45.0), (0, 0));
    }

    #[test]
    fn test_rotate_nearest_quarter_turn() {
        // column 0 red, rest blue; a clockwise quarter turn moves it to row 0
        let src = buffer(3, 3, |x, _| if x == 0 { RED } else { BLUE });
        let out = rotate_nearest(src.bytes(), 3, 3, 90.0);
        assert_eq!((out.width(), out.height()), (3, 3));
        for x in 0..3 {
            assert_eq!(out.pixel(x, 0), RED);
            assert_eq!(out.pixel(x, 2), BLUE);
        }
    }

    #[test]
    fn test_epx_diagonal() {
        // red upper-left triangle, blue lower-right
        let src = buffer(3, 3, |x, y| if x + y >= 2 { BLUE } else { RED });
        let out = epx_2x(src.bytes(), 3, 3);
        assert_eq!((out.width(), out.height()), (6, 6));
        // centre pixel (1,1) is BLUE; its up/left neighbours are RED and the
        // down/right are BLUE, so the top-left corner of its quad turns RED.
        assert_eq!(out.pixel(2, 2), RED);
        assert_eq!(out.pixel(3, 3), BLUE);
        assert_eq!(out.pixel(3, 2), BLUE);
        assert_eq!(out.pixel(2, 3), BLUE);
    }

    #[test]
    fn test_scale2x_diagonal() {
        let src = buffer(3, 3, |x, y| if x + y >= 2 { BLUE } else { RED });
        let out = scale2x(src.bytes(), 3, 3);
        assert_eq!(out.pixel(2, 2), RED);
        assert_eq!(out.pixel(3, 3), BLUE);
    }

    #[test]
    fn test_upscalers_flat_region_unchanged() {
        let src = buffer(2, 2, |_, _| RED);
        for out in [epx_2x(src.bytes(), 2, 2), scale2x(src.bytes(), 2, 2)] {
            assert_eq!(out.opaque_count(), 16);
            assert!(out.bytes().chunks_exact(4).all(|p| p == RED));
        }
    }

    #[test]
    fn test_premultiply_round_trip_opaque() {
        let mut px = vec![10, 200, 77, 255, 9, 9, 9, 0];
        premultiply(&mut px);
        assert_eq!(&px[0..4], &[10, 200, 77, 255]);
        assert_eq!(&px[4..8], &[0, 0, 0, 0]);
        let mut half = vec![100, 50, 0, 128];
        premultiply(&mut half);
        unpremultiply(&mut half);
        assert!((half[0] as i32 - 100).abs() <= 1);
        assert!((half[1] as i32 - 50).abs() <= 1);
    }

    #[test]
    fn test_transform_buffer_sizes() {
        let src = buffer(4, 2, |_, _| RED);
        let out = transform_buffer(&src, 2.0, 1.5, 0.0, Interpolation::Smooth2x);
        assert_eq!((out.width(), out.height()), (8, 3));
        let out = transform_buffer(&src, 1.0, 1.0, 90.0, Interpolation::Nearest);
        assert_eq!((out.width(), out.height()), (2, 4));
        let out = transform_buffer(&src, 1.0, 1.0, 90.0, Interpolation::RotSprite);
        assert_eq!((out.width(), out.height()), (2, 4));
        let out = transform_buffer(&src, 0.0001, 0.0001, 0.0, Interpolation::Bilinear);
        assert_eq!((out.width(), out.height()), (1, 1));
    }

    #[test]
    fn test_rotsprite_keeps_solid_interior() {
        let src = buffer(4, 4, |_, _| RED);
        let out = rotate_sprite_approx(src.bytes(), 4, 4, 90.0);
        assert_eq!((out.width(), out.height()), (4, 4));
        assert_eq!(out.pixel(1, 1), RED);
        assert_eq!(out.pixel(2, 2), RED);
    }
}
