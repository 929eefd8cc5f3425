// ============================================================================
// TRANSFORM STATE - affine matrices, sticky + cumulative selection transform
// ============================================================================

use std::ops::Mul;

use egui::{Pos2, Vec2};

/// Lower clamp for every scale factor.
pub const MIN_SCALE: f32 = 0.01;

/// 2D affine matrix stored as two rows: `x' = m[0]·(x, y, 1)`, `y' = m[1]·(x, y, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub m: [[f32; 3]; 2],
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine { m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn translate(v: Vec2) -> Self {
        Affine { m: [[1.0, 0.0, v.x], [0.0, 1.0, v.y]] }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Affine { m: [[sx, 0.0, 0.0], [0.0, sy, 0.0]] }
    }

    /// Rotation about the origin. With y pointing down, positive angles turn
    /// clockwise on screen.
    pub fn rotate_deg(deg: f32) -> Self {
        let (s, c) = deg.to_radians().sin_cos();
        Affine { m: [[c, -s, 0.0], [s, c, 0.0]] }
    }

    /// `self · rhs`: the result applies `rhs` first, then `self`.
    pub fn compose(&self, rhs: &Affine) -> Affine {
        let a = &self.m;
        let b = &rhs.m;
        Affine {
            m: [
                [
                    a[0][0] * b[0][0] + a[0][1] * b[1][0],
                    a[0][0] * b[0][1] + a[0][1] * b[1][1],
                    a[0][0] * b[0][2] + a[0][1] * b[1][2] + a[0][2],
                ],
                [
                    a[1][0] * b[0][0] + a[1][1] * b[1][0],
                    a[1][0] * b[0][1] + a[1][1] * b[1][1],
                    a[1][0] * b[0][2] + a[1][1] * b[1][2] + a[1][2],
                ],
            ],
        }
    }

    /// Apply `self`, then `next`.
    pub fn then(&self, next: &Affine) -> Affine {
        next.compose(self)
    }

    pub fn transform_point(&self, p: Pos2) -> Pos2 {
        let m = &self.m;
        Pos2::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2],
        )
    }

    /// Linear part only (ignores translation).
    pub fn transform_vector(&self, v: Vec2) -> Vec2 {
        let m = &self.m;
        Vec2::new(m[0][0] * v.x + m[0][1] * v.y, m[1][0] * v.x + m[1][1] * v.y)
    }

    pub fn determinant(&self) -> f32 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    /// `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = 1.0 / det;
        let [[a, b, tx], [c, d, ty]] = self.m;
        let ia = d * inv;
        let ib = -b * inv;
        let ic = -c * inv;
        let id = a * inv;
        Some(Affine {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }

    pub fn is_identity(&self, eps: f32) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(Self::IDENTITY.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Affine {
    type Output = Affine;

    fn mul(self, rhs: Affine) -> Affine {
        self.compose(&rhs)
    }
}

// ---------------------------------------------------------------------------
//  Angle / scale helpers
// ---------------------------------------------------------------------------

/// Wrap an angle into (-180, 180].
pub fn normalize_degrees(deg: f32) -> f32 {
    if !deg.is_finite() {
        return 0.0;
    }
    let mut d = deg % 360.0;
    if d <= -180.0 {
        d += 360.0;
    } else if d > 180.0 {
        d -= 360.0;
    }
    d
}

/// Round to the nearest multiple of `step`, then normalise.
pub fn snap_degrees(angle: f32, step: f32) -> f32 {
    if step <= 0.0 {
        return normalize_degrees(angle);
    }
    normalize_degrees((angle / step).round() * step)
}

pub fn snap_scale(ratio: f32, step: f32, min: f32) -> f32 {
    let snapped = if step > 0.0 { (ratio / step).round() * step } else { ratio };
    snapped.max(min)
}

/// Scale factor for a handle drag: pointer distance to the centre now over
/// the distance at gesture start, snapped to 1% and clamped.
pub fn scale_ratio(start_dist: f32, cur_dist: f32) -> f32 {
    if start_dist < 1e-6 {
        return 1.0;
    }
    snap_scale(cur_dist / start_dist, 0.01, MIN_SCALE)
}

// ---------------------------------------------------------------------------
//  TransformState
// ---------------------------------------------------------------------------

/// Sticky transform of the current selection.
///
/// `rotation`/`scale` are the live values of the sub-gesture in progress.
/// `cumulative_rotation`/`baked_scale` record what has already been baked
/// into the floating buffer. Translation and pivot survive bakes. Every scale
/// factor is clamped to `min_scale`, which also survives `reset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformState {
    rotation_deg: f32,
    scale_x: f32,
    scale_y: f32,
    translation: Vec2,
    cumulative_rotation_deg: f32,
    baked_scale_x: f32,
    baked_scale_y: f32,
    pivot: Option<Pos2>,
    min_scale: f32,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            rotation_deg: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            translation: Vec2::ZERO,
            cumulative_rotation_deg: 0.0,
            baked_scale_x: 1.0,
            baked_scale_y: 1.0,
            pivot: None,
            min_scale: MIN_SCALE,
        }
    }
}

impl TransformState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity transform with a custom scale floor. Non-positive floors fall
    /// back to [`MIN_SCALE`].
    pub fn with_min_scale(min_scale: f32) -> Self {
        let mut t = Self::default();
        t.set_min_scale(min_scale);
        t
    }

    pub fn min_scale(&self) -> f32 {
        self.min_scale
    }

    pub fn set_min_scale(&mut self, min_scale: f32) {
        self.min_scale = if min_scale > 0.0 && min_scale.is_finite() { min_scale } else { MIN_SCALE };
        self.scale_x = self.scale_x.max(self.min_scale);
        self.scale_y = self.scale_y.max(self.min_scale);
    }

    pub fn rotation_deg(&self) -> f32 {
        self.rotation_deg
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    pub fn translation(&self) -> Vec2 {
        self.translation
    }

    pub fn cumulative_rotation_deg(&self) -> f32 {
        self.cumulative_rotation_deg
    }

    pub fn baked_scale(&self) -> (f32, f32) {
        (self.baked_scale_x, self.baked_scale_y)
    }

    /// User-placed pivot in pre-translation document space; `None` means the
    /// outline centroid.
    pub fn pivot(&self) -> Option<Pos2> {
        self.pivot
    }

    pub fn set_rotation(&mut self, deg: f32) {
        self.rotation_deg = normalize_degrees(deg);
    }

    pub fn add_rotation(&mut self, delta_deg: f32) {
        self.set_rotation(self.rotation_deg + delta_deg);
    }

    pub fn set_scale(&mut self, sx: f32, sy: f32) {
        self.scale_x = sx.max(self.min_scale);
        self.scale_y = sy.max(self.min_scale);
    }

    pub fn set_translation(&mut self, t: Vec2) {
        self.translation = t;
    }

    pub fn translate_by(&mut self, delta: Vec2) {
        self.translation += delta;
    }

    pub fn set_pivot(&mut self, pivot: Option<Pos2>) {
        self.pivot = pivot;
    }

    pub fn reset(&mut self) {
        *self = Self::with_min_scale(self.min_scale);
    }

    /// Fold the live rotation and scale into the cumulative values.
    pub fn bake(&mut self) {
        self.cumulative_rotation_deg = normalize_degrees(self.cumulative_rotation_deg + self.rotation_deg);
        self.baked_scale_x = (self.baked_scale_x * self.scale_x).max(self.min_scale);
        self.baked_scale_y = (self.baked_scale_y * self.scale_y).max(self.min_scale);
        self.rotation_deg = 0.0;
        self.scale_x = 1.0;
        self.scale_y = 1.0;
    }

    pub fn total_rotation_deg(&self) -> f32 {
        normalize_degrees(self.cumulative_rotation_deg + self.rotation_deg)
    }

    pub fn total_scale(&self) -> (f32, f32) {
        (self.baked_scale_x * self.scale_x, self.baked_scale_y * self.scale_y)
    }

    /// True when nothing is pending: no live change and nothing baked.
    pub fn is_identity(&self) -> bool {
        self.rotation_deg == 0.0
            && self.scale_x == 1.0
            && self.scale_y == 1.0
            && self.translation == Vec2::ZERO
            && self.cumulative_rotation_deg == 0.0
            && self.baked_scale_x == 1.0
            && self.baked_scale_y == 1.0
    }

    /// True when the live sub-gesture has changed rotation or scale.
    pub fn has_live_change(&self) -> bool {
        self.rotation_deg != 0.0 || self.scale_x != 1.0 || self.scale_y != 1.0
    }

    /// `Translate · Rotate · Scale` of the live values.
    pub fn compose_matrix(&self) -> Affine {
        Affine::translate(self.translation)
            * Affine::rotate_deg(self.rotation_deg)
            * Affine::scale(self.scale_x, self.scale_y)
    }

    pub fn transform_point(&self, p: Pos2) -> Pos2 {
        self.compose_matrix().transform_point(p)
    }

    /// Live rotation and scale without translation. Scale acts along the
    /// object's own axes, i.e. the axes already turned by the cumulative
    /// rotation.
    pub fn live_linear(&self) -> Affine {
        let cum = self.cumulative_rotation_deg;
        Affine::rotate_deg(self.rotation_deg)
            * Affine::rotate_deg(cum)
            * Affine::scale(self.scale_x, self.scale_y)
            * Affine::rotate_deg(-cum)
    }

    /// The live transform applied about `pivot`, then translated.
    pub fn compose_about(&self, pivot: Pos2) -> Affine {
        Affine::translate(self.translation)
            * Affine::translate(pivot.to_vec2())
            * self.live_linear()
            * Affine::translate(-pivot.to_vec2())
    }
}
