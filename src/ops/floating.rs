// ============================================================================
// FLOATING SELECTION - lifted pixels, baked buffer, memoised preview
// ============================================================================

use egui::{Pos2, Vec2};
use rayon::prelude::*;

use crate::canvas::{PixelBuffer, PixelRect, PixelStore, SelectionMask};
use crate::ops::outline::{build_outlines_with, rings_centroid, Outline, OutlineMode};
use crate::ops::resample::{transform_buffer, Interpolation};
use crate::ops::transform::{Affine, TransformState};

// ---------------------------------------------------------------------------
//  Memo
// ---------------------------------------------------------------------------

/// A value cached against the key that produced it. Rebuilt only when asked
/// for with a different key.
#[derive(Debug)]
pub struct Memo<K: PartialEq, V> {
    key: Option<K>,
    value: Option<V>,
    rebuilds: u64,
}

impl<K: PartialEq, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self { key: None, value: None, rebuilds: 0 }
    }
}

impl<K: PartialEq, V> Memo<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, key: K, build: impl FnOnce() -> V) -> &V {
        if self.key.as_ref() != Some(&key) {
            self.value = None;
        }
        let value = match self.value.take() {
            Some(v) => v,
            None => {
                self.rebuilds += 1;
                self.key = Some(key);
                build()
            }
        };
        &*self.value.insert(value)
    }

    pub fn peek(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.value = None;
    }

    /// Number of times the value has been built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Parameters that determine the preview pixels, quantised so tiny float
/// noise does not force a rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    scale_x: i64,
    scale_y: i64,
    rotation: i64,
    pivot: Option<(i64, i64)>,
    interpolation: Interpolation,
}

fn quantize(v: f32) -> i64 {
    (v as f64 * 10_000.0).round() as i64
}

impl PreviewKey {
    pub fn new(t: &TransformState, interpolation: Interpolation) -> Self {
        let (sx, sy) = t.total_scale();
        Self {
            scale_x: quantize(sx),
            scale_y: quantize(sy),
            rotation: quantize(t.total_rotation_deg()),
            pivot: t.pivot().map(|p| (quantize(p.x), quantize(p.y))),
            interpolation,
        }
    }
}

// ---------------------------------------------------------------------------
//  Placement
// ---------------------------------------------------------------------------

/// Where the current preview sits in the document.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    /// Displayed centre of the transformed content.
    pub center: Pos2,
    /// Integer top-left of the preview buffer.
    pub origin: (i32, i32),
    pub width: u32,
    pub height: u32,
    /// Baked-space → document transform (pivot-relative, translated).
    pub matrix: Affine,
}

// ---------------------------------------------------------------------------
//  FloatingSelection
// ---------------------------------------------------------------------------

/// Pixels lifted out of a layer for transformation.
///
/// `source` is the pristine lift and is never modified. `baked` is the source
/// resampled with everything already folded into the transform's cumulative
/// rotation and baked scale; its top-left is `baked_origin` (document space,
/// before the sticky translation). `outlines` holds one ring per boundary of
/// the baked content. The layer is untouched until commit.
pub struct FloatingSelection {
    source: PixelBuffer,
    source_rect: PixelRect,
    lift_mask: SelectionMask,
    baked: PixelBuffer,
    baked_origin: (i32, i32),
    outlines: Vec<Outline>,
    interpolation: Interpolation,
    preview: Memo<PreviewKey, PixelBuffer>,
}

impl FloatingSelection {
    /// Copy the masked pixels out of `store`. Pixels inside the bounding box
    /// but outside the mask are zeroed. `None` when the mask is empty or the
    /// store returned a short read.
    pub fn lift(
        store: &dyn PixelStore,
        mask: &SelectionMask,
        outlines: &[Outline],
        interpolation: Interpolation,
    ) -> Option<Self> {
        let (sw, sh) = store.size();
        let bounds = mask.bounds()?.clamp_to(sw, sh);
        if bounds.is_empty() {
            return None;
        }
        let mut bytes = store.read_rect(bounds);
        if bytes.len() != bounds.area() * 4 {
            log::warn!(
                "Floating: layer returned {} bytes for {:?}, expected {}",
                bytes.len(),
                bounds,
                bounds.area() * 4
            );
            return None;
        }

        let row_bytes = bounds.width as usize * 4;
        bytes.par_chunks_mut(row_bytes).enumerate().for_each(|(row, px_row)| {
            let y = bounds.y + row as i32;
            for (col, px) in px_row.chunks_exact_mut(4).enumerate() {
                if !mask.contains(bounds.x + col as i32, y) {
                    px.fill(0);
                }
            }
        });

        let source = PixelBuffer::from_parts(bounds.width, bounds.height, bytes);
        log::info!(
            "Floating: lifted {}x{} at ({}, {}), {} opaque pixels",
            bounds.width,
            bounds.height,
            bounds.x,
            bounds.y,
            source.opaque_count()
        );

        let outlines = if outlines.iter().all(Outline::is_empty) {
            vec![Outline::from_rect(bounds)]
        } else {
            outlines.to_vec()
        };
        Some(Self {
            baked: source.clone(),
            source,
            source_rect: bounds,
            lift_mask: mask.clone(),
            baked_origin: (bounds.x, bounds.y),
            outlines,
            interpolation,
            preview: Memo::new(),
        })
    }

    pub fn source(&self) -> &PixelBuffer {
        &self.source
    }

    pub fn source_rect(&self) -> PixelRect {
        self.source_rect
    }

    pub fn lift_mask(&self) -> &SelectionMask {
        &self.lift_mask
    }

    pub fn baked(&self) -> &PixelBuffer {
        &self.baked
    }

    pub fn baked_origin(&self) -> (i32, i32) {
        self.baked_origin
    }

    /// Baked rings in pre-translation document space.
    pub fn outlines(&self) -> &[Outline] {
        &self.outlines
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        if self.interpolation != interpolation {
            self.interpolation = interpolation;
            self.preview.invalidate();
        }
    }

    pub fn preview_rebuilds(&self) -> u64 {
        self.preview.rebuilds()
    }

    /// Rotation/scale pivot: the user pivot, else the centroid of the baked
    /// rings.
    pub fn pivot(&self, t: &TransformState) -> Pos2 {
        t.pivot().unwrap_or_else(|| rings_centroid(&self.outlines))
    }

    fn baked_center(&self) -> Pos2 {
        Pos2::new(
            self.baked_origin.0 as f32 + self.baked.width() as f32 / 2.0,
            self.baked_origin.1 as f32 + self.baked.height() as f32 / 2.0,
        )
    }

    /// The source resampled with the total scale and rotation. Memoised.
    pub fn preview(&mut self, t: &TransformState) -> &PixelBuffer {
        let key = PreviewKey::new(t, self.interpolation);
        let (sx, sy) = t.total_scale();
        let deg = t.total_rotation_deg();
        let interpolation = self.interpolation;
        let source = &self.source;
        self.preview.get_or_build(key, || {
            log::debug!("Floating: rebuilding preview (scale {sx:.2}x{sy:.2}, {deg:.1}°, {interpolation:?})");
            transform_buffer(source, sx, sy, deg, interpolation)
        })
    }

    /// Centre of the transformed content before translation.
    fn placed_center(&self, t: &TransformState, pivot: Pos2) -> Pos2 {
        let offset = t.live_linear().transform_vector(self.baked_center() - pivot);
        pivot + offset
    }

    pub fn placement(&mut self, t: &TransformState, pivot: Pos2) -> Placement {
        let center = self.placed_center(t, pivot) + t.translation();
        let (width, height) = {
            let preview = self.preview(t);
            (preview.width(), preview.height())
        };
        Placement {
            center,
            origin: (
                (center.x - width as f32 / 2.0).round() as i32,
                (center.y - height as f32 / 2.0).round() as i32,
            ),
            width,
            height,
            matrix: t.compose_about(pivot),
        }
    }

    /// Baked rings under the live transform.
    pub fn display_outlines(&self, t: &TransformState, pivot: Pos2) -> Vec<Outline> {
        let m = t.compose_about(pivot);
        self.outlines.iter().map(|ring| ring.transformed(&m)).collect()
    }

    /// Materialise the live rotation/scale: the preview becomes the baked
    /// buffer at its placed (pre-translation) origin, the rings are retraced
    /// from its alpha, and the transform folds its live values.
    pub fn bake(&mut self, t: &mut TransformState, pivot: Pos2, mode: OutlineMode, simplify_epsilon: f32) {
        if !t.has_live_change() {
            return;
        }
        let center = self.placed_center(t, pivot);
        let baked = self.preview(t).clone();
        let origin = (
            (center.x - baked.width() as f32 / 2.0).round() as i32,
            (center.y - baked.height() as f32 / 2.0).round() as i32,
        );

        let mut local = SelectionMask::new(baked.width(), baked.height());
        local.add_alpha_runs(&baked, 0, 0);
        let traced = build_outlines_with(&local, mode, simplify_epsilon);
        self.outlines = if traced.is_empty() {
            vec![Outline::from_rect(PixelRect::new(origin.0, origin.1, baked.width(), baked.height()))]
        } else {
            traced
                .iter()
                .map(|ring| ring.translated(origin.0 as f32, origin.1 as f32))
                .collect()
        };

        log::debug!(
            "Floating: baked {}x{} at ({}, {}), rotation {:.1}° scale {:.2}x{:.2}",
            baked.width(),
            baked.height(),
            origin.0,
            origin.1,
            t.total_rotation_deg(),
            t.total_scale().0,
            t.total_scale().1
        );
        self.baked = baked;
        self.baked_origin = origin;
        t.bake();
    }

    /// Top-left of the baked buffer once the sticky translation is applied.
    pub fn dest_origin(&self, t: &TransformState) -> (i32, i32) {
        let Vec2 { x, y } = t.translation();
        (self.baked_origin.0 + x.round() as i32, self.baked_origin.1 + y.round() as i32)
    }

    pub fn dest_rect(&self, t: &TransformState) -> PixelRect {
        let (x, y) = self.dest_origin(t);
        PixelRect::new(x, y, self.baked.width(), self.baked.height())
    }

    /// Document region a commit rewrites: the lift area plus the destination,
    /// clipped to the document.
    pub fn stamp_region(&self, t: &TransformState, doc_w: u32, doc_h: u32) -> PixelRect {
        self.source_rect.union(&self.dest_rect(t)).clamp_to(doc_w, doc_h)
    }

    /// Rewrite `bytes` (BGRA covering `region`): clear the lifted pixels, then
    /// composite the baked buffer source-over at its destination.
    pub fn compose_into(&self, region: PixelRect, bytes: &mut [u8], t: &TransformState) {
        if region.is_empty() || bytes.len() != region.area() * 4 {
            return;
        }
        let (ox, oy) = self.dest_origin(t);
        let baked = &self.baked;
        let lift_mask = &self.lift_mask;
        let row_bytes = region.width as usize * 4;

        bytes.par_chunks_mut(row_bytes).enumerate().for_each(|(row, px_row)| {
            let y = region.y + row as i32;
            for (col, px) in px_row.chunks_exact_mut(4).enumerate() {
                let x = region.x + col as i32;
                if lift_mask.contains(x, y) {
                    px.fill(0);
                }
                let src = baked.pixel(x - ox, y - oy);
                if src[3] == 0 {
                    continue;
                }
                let dst = [px[0], px[1], px[2], px[3]];
                px.copy_from_slice(&alpha_blend(dst, src));
            }
        });
    }

    /// Mask of the stamped pixels: every baked pixel with alpha > 0 at its
    /// destination.
    pub fn stamped_mask(&self, t: &TransformState, doc_w: u32, doc_h: u32) -> SelectionMask {
        let mut mask = SelectionMask::new(doc_w, doc_h);
        let (ox, oy) = self.dest_origin(t);
        mask.add_alpha_runs(&self.baked, ox, oy);
        mask
    }
}

/// Source-over composite of two straight-alpha pixels (channel order
/// agnostic, alpha last).
fn alpha_blend(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 || dst[3] == 0 {
        return src;
    }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a < 0.001 {
        return [0; 4];
    }
    let inv = 1.0 / out_a;
    let mix = |s: u8, d: u8| ((s as f32 * sa + d as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8;
    [
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;
    use crate::ops::outline::trace_all_boundaries;

    fn gradient_layer(w: u32, h: u32) -> Layer {
        let mut layer = Layer::new("test", w, h);
        for y in 0..h {
            for x in 0..w {
                layer.pixels.put_pixel(x, y, [x as u8, y as u8, 100, 255]);
            }
        }
        layer
    }

    fn lift_rect(layer: &Layer, rect: PixelRect) -> FloatingSelection {
        let (w, h) = layer.size();
        let mask = SelectionMask::from_rect(w, h, rect);
        let outlines = trace_all_boundaries(&mask);
        FloatingSelection::lift(layer, &mask, &outlines, Interpolation::Nearest).unwrap()
    }

    #[test]
    fn test_memo_rebuilds_on_key_change_only() {
        let mut memo: Memo<u32, String> = Memo::new();
        assert_eq!(memo.get_or_build(1, || "a".into()), "a");
        assert_eq!(memo.get_or_build(1, || "b".into()), "a");
        assert_eq!(memo.get_or_build(2, || "c".into()), "c");
        assert_eq!(memo.rebuilds(), 2);
        memo.invalidate();
        assert!(memo.peek().is_none());
        memo.get_or_build(2, || "d".into());
        assert_eq!(memo.rebuilds(), 3);
    }

    #[test]
    fn test_lift_zeroes_unmasked_and_leaves_layer() {
        let layer = gradient_layer(10, 10);
        let mut mask = SelectionMask::new(10, 10);
        mask.add_rect(2, 2, 2, 2);
        mask.add_rect(2, 4, 4, 2);
        let outlines = trace_all_boundaries(&mask);
        let floating = FloatingSelection::lift(&layer, &mask, &outlines, Interpolation::Nearest).unwrap();

        assert_eq!(floating.source_rect(), PixelRect::new(2, 2, 4, 4));
        assert_eq!(floating.source().pixel(0, 0), [2, 2, 100, 255]);
        assert_eq!(floating.source().pixel(3, 0), [0; 4]);
        assert_eq!(floating.source().opaque_count(), 12);
        // lifting never writes to the layer
        assert_eq!(layer.pixels.pixel(2, 2), [2, 2, 100, 255]);
    }

    #[test]
    fn test_lift_empty_mask_is_none() {
        let layer = gradient_layer(4, 4);
        let mask = SelectionMask::new(4, 4);
        assert!(FloatingSelection::lift(&layer, &mask, &[], Interpolation::Nearest).is_none());
    }

    #[test]
    fn test_preview_memoised() {
        let layer = gradient_layer(10, 10);
        let mut floating = lift_rect(&layer, PixelRect::new(1, 1, 4, 2));
        let mut t = TransformState::new();

        floating.preview(&t);
        floating.preview(&t);
        assert_eq!(floating.preview_rebuilds(), 1);

        t.translate_by(Vec2::new(3.0, 0.0));
        floating.preview(&t);
        assert_eq!(floating.preview_rebuilds(), 1);

        t.set_rotation(90.0);
        let p = floating.preview(&t);
        assert_eq!((p.width(), p.height()), (2, 4));
        assert_eq!(floating.preview_rebuilds(), 2);

        floating.set_interpolation(Interpolation::Bilinear);
        floating.preview(&t);
        assert_eq!(floating.preview_rebuilds(), 3);
    }

    #[test]
    fn test_bake_quarter_turn_keeps_square_in_place() {
        let layer = gradient_layer(16, 16);
        let mut floating = lift_rect(&layer, PixelRect::new(5, 5, 4, 4));
        let mut t = TransformState::new();
        t.set_rotation(90.0);
        let pivot = floating.pivot(&t);
        assert_eq!(pivot, Pos2::new(7.0, 7.0));

        floating.bake(&mut t, pivot, OutlineMode::Trace, 0.001);
        assert_eq!(floating.baked_origin(), (5, 5));
        assert_eq!((floating.baked().width(), floating.baked().height()), (4, 4));
        assert_eq!(t.cumulative_rotation_deg(), 90.0);
        assert_eq!(t.rotation_deg(), 0.0);
        assert_eq!(floating.outlines(), &[Outline::from_rect(PixelRect::new(5, 5, 4, 4))]);
        // clockwise turn: the source's bottom-left pixel lands top-left
        assert_eq!(floating.baked().pixel(0, 0), floating.source().pixel(0, 3));
    }

    #[test]
    fn test_bake_keeps_every_piece() {
        let layer = gradient_layer(32, 32);
        let mut mask = SelectionMask::new(32, 32);
        mask.add_rect(0, 0, 4, 4);
        mask.add_rect(12, 0, 4, 4);
        let outlines = trace_all_boundaries(&mask);
        let mut floating = FloatingSelection::lift(&layer, &mask, &outlines, Interpolation::Nearest).unwrap();
        assert_eq!(floating.outlines().len(), 2);
        assert_eq!(floating.pivot(&TransformState::new()), Pos2::new(8.0, 2.0));

        let mut t = TransformState::new();
        t.set_rotation(90.0);
        let pivot = floating.pivot(&t);
        floating.bake(&mut t, pivot, OutlineMode::Trace, 0.001);
        // the pair now stacks vertically about the same centre
        assert_eq!(
            floating.outlines(),
            &[
                Outline::from_rect(PixelRect::new(6, -6, 4, 4)),
                Outline::from_rect(PixelRect::new(6, 6, 4, 4)),
            ]
        );
    }

    #[test]
    fn test_placement_follows_translation() {
        let layer = gradient_layer(16, 16);
        let mut floating = lift_rect(&layer, PixelRect::new(2, 3, 4, 2));
        let mut t = TransformState::new();
        t.set_translation(Vec2::new(5.0, -1.0));
        let pivot = floating.pivot(&t);
        let placement = floating.placement(&t, pivot);
        assert_eq!(placement.origin, (7, 2));
        assert_eq!((placement.width, placement.height), (4, 2));
        assert_eq!(floating.dest_rect(&t), PixelRect::new(7, 2, 4, 2));
    }

    #[test]
    fn test_compose_into_moves_pixels() {
        let layer = gradient_layer(8, 8);
        let floating = lift_rect(&layer, PixelRect::new(0, 0, 2, 2));
        let mut t = TransformState::new();
        t.set_translation(Vec2::new(3.0, 0.0));

        let region = floating.stamp_region(&t, 8, 8);
        assert_eq!(region, PixelRect::new(0, 0, 5, 2));
        let mut bytes = layer.read_rect(region);
        floating.compose_into(region, &mut bytes, &t);

        let px = |x: usize, y: usize| {
            let i = (y * region.width as usize + x) * 4;
            [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]
        };
        assert_eq!(px(0, 0), [0; 4]);
        assert_eq!(px(2, 1), [2, 1, 100, 255]);
        assert_eq!(px(3, 0), [0, 0, 100, 255]);
        assert_eq!(px(4, 1), [1, 1, 100, 255]);

        let mask = floating.stamped_mask(&t, 8, 8);
        assert_eq!(mask.bounds(), Some(PixelRect::new(3, 0, 2, 2)));
    }

    #[test]
    fn test_alpha_blend() {
        assert_eq!(alpha_blend([1, 2, 3, 255], [0, 0, 0, 0]), [1, 2, 3, 255]);
        assert_eq!(alpha_blend([1, 2, 3, 255], [9, 9, 9, 255]), [9, 9, 9, 255]);
        assert_eq!(alpha_blend([0, 0, 0, 0], [9, 9, 9, 128]), [9, 9, 9, 128]);
        let half = alpha_blend([0, 0, 200, 255], [200, 0, 0, 128]);
        assert_eq!(half[3], 255);
        assert!(half[0] > 90 && half[0] < 110);
        assert!(half[2] > 90 && half[2] < 110);
    }
}
