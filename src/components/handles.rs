use egui::{Pos2, Vec2};

use crate::config::SelectionConfig;
use crate::ops::outline::{rings_centroid, rings_contain, Outline};

// ============================================================================
// VIEW TRANSFORM
// ============================================================================

/// Document → screen mapping: `screen = origin + doc * zoom`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub origin: Pos2,
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { origin: Pos2::ZERO, zoom: 1.0 }
    }
}

impl ViewTransform {
    pub fn new(origin: Pos2, zoom: f32) -> Self {
        Self { origin, zoom: if zoom > 0.0 { zoom } else { 1.0 } }
    }

    pub fn canvas_to_screen(&self, p: Pos2) -> Pos2 {
        self.origin + p.to_vec2() * self.zoom
    }

    pub fn screen_to_canvas(&self, p: Pos2) -> Pos2 {
        ((p - self.origin) / self.zoom).to_pos2()
    }
}

// ============================================================================
// HANDLE IDENTIFIERS
// ============================================================================

/// The eight scale handles of the transformed bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScaleHandle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
}

impl ScaleHandle {
    pub const ALL: [ScaleHandle; 8] = [
        ScaleHandle::TopLeft,
        ScaleHandle::Top,
        ScaleHandle::TopRight,
        ScaleHandle::Right,
        ScaleHandle::BottomRight,
        ScaleHandle::Bottom,
        ScaleHandle::BottomLeft,
        ScaleHandle::Left,
    ];

    pub fn is_corner(&self) -> bool {
        matches!(
            self,
            ScaleHandle::TopLeft | ScaleHandle::TopRight | ScaleHandle::BottomRight | ScaleHandle::BottomLeft
        )
    }

    /// Local axes the handle scales, `(x, y)`.
    pub fn axes(&self) -> (bool, bool) {
        match self {
            ScaleHandle::Top | ScaleHandle::Bottom => (false, true),
            ScaleHandle::Left | ScaleHandle::Right => (true, false),
            _ => (true, true),
        }
    }

    /// Position on the box in `[-1, 1]` units from its centre.
    fn unit(&self) -> Vec2 {
        match self {
            ScaleHandle::TopLeft => Vec2::new(-1.0, -1.0),
            ScaleHandle::Top => Vec2::new(0.0, -1.0),
            ScaleHandle::TopRight => Vec2::new(1.0, -1.0),
            ScaleHandle::Right => Vec2::new(1.0, 0.0),
            ScaleHandle::BottomRight => Vec2::new(1.0, 1.0),
            ScaleHandle::Bottom => Vec2::new(0.0, 1.0),
            ScaleHandle::BottomLeft => Vec2::new(-1.0, 1.0),
            ScaleHandle::Left => Vec2::new(-1.0, 0.0),
        }
    }
}

/// What a press landed on, in hit-test priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleId {
    Pivot,
    /// Rotation handle `n`, counting the vertices of every outer ring in
    /// order.
    Rotate(usize),
    Scale(ScaleHandle),
    /// Inside the selection (even-odd over all rings).
    Interior,
}

// ============================================================================
// HANDLE LAYOUT
// ============================================================================

/// Handle positions for the displayed outline. Handle points are in view
/// space; `pivot_doc` and `scale_center` are in document space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandleLayout {
    pub pivot: Pos2,
    pub pivot_doc: Pos2,
    pub rotate: Vec<Pos2>,
    pub scale: Vec<(ScaleHandle, Pos2)>,
    /// Centre of the scale box; scale drags measure distances from here.
    pub scale_center: Pos2,
}

fn rotate_about(p: Pos2, center: Pos2, deg: f32) -> Pos2 {
    let (s, c) = deg.to_radians().sin_cos();
    let d = p - center;
    center + Vec2::new(c * d.x - s * d.y, s * d.x + c * d.y)
}

impl HandleLayout {
    /// Lay out handles around the displayed rings (document space).
    /// Rotation handles sit on the vertices of the outer rings, pointing away
    /// from their own ring's centroid. `rotation_deg` is the total rotation
    /// of the content; the scale box bounds every ring in the content's own
    /// axes.
    pub fn compute(
        outlines: &[Outline],
        pivot_doc: Pos2,
        rotation_deg: f32,
        view: &ViewTransform,
        cfg: &SelectionConfig,
    ) -> Self {
        let mut layout = HandleLayout {
            pivot: view.canvas_to_screen(pivot_doc),
            pivot_doc,
            ..Default::default()
        };
        if outlines.iter().all(Outline::is_empty) {
            return layout;
        }

        for ring in outlines.iter().filter(|ring| ring.signed_area() > 0.0) {
            let centroid_view = view.canvas_to_screen(ring.centroid());
            layout.rotate.extend(ring.points().iter().map(|p| {
                let v = view.canvas_to_screen(*p);
                let dir = v - centroid_view;
                let dir = if dir.length() > 1e-6 { dir.normalized() } else { Vec2::new(0.0, -1.0) };
                v + dir * cfg.rotate_handle_offset
            }));
        }

        let centroid = rings_centroid(outlines);
        let mut min = Pos2::new(f32::INFINITY, f32::INFINITY);
        let mut max = Pos2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in outlines.iter().flat_map(|ring| ring.points()) {
            let local = rotate_about(*p, centroid, -rotation_deg);
            min = min.min(local);
            max = max.max(local);
        }
        let box_center = Pos2::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
        let half = (max - min) / 2.0;
        layout.scale_center = rotate_about(box_center, centroid, rotation_deg);
        layout.scale = ScaleHandle::ALL
            .iter()
            .map(|h| {
                let u = h.unit();
                let local = box_center + Vec2::new(u.x * half.x, u.y * half.y);
                (*h, view.canvas_to_screen(rotate_about(local, centroid, rotation_deg)))
            })
            .collect();
        layout
    }

    /// First handle under the pointer: pivot, rotation handles, scale
    /// handles, then the interior of the rings. `None` means outside.
    pub fn hit_test(
        &self,
        view_pos: Pos2,
        doc_pos: Pos2,
        outlines: &[Outline],
        cfg: &SelectionConfig,
    ) -> Option<HandleId> {
        if outlines.iter().all(Outline::is_empty) {
            return None;
        }
        let in_square = |center: Pos2, size: f32| {
            let half = size / 2.0;
            (view_pos.x - center.x).abs() <= half && (view_pos.y - center.y).abs() <= half
        };

        if in_square(self.pivot, cfg.pivot_hit_size) {
            return Some(HandleId::Pivot);
        }
        if let Some(i) = self
            .rotate
            .iter()
            .position(|p| p.distance(view_pos) <= cfg.rotate_handle_radius)
        {
            return Some(HandleId::Rotate(i));
        }
        if let Some((h, _)) = self.scale.iter().find(|(_, p)| in_square(*p, cfg.scale_handle_size)) {
            return Some(HandleId::Scale(*h));
        }
        if rings_contain(outlines, doc_pos, cfg.hit_epsilon) {
            return Some(HandleId::Interior);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelRect;

    fn square_layout(rotation: f32) -> (Vec<Outline>, HandleLayout, SelectionConfig) {
        let cfg = SelectionConfig::default();
        let outlines = vec![Outline::from_rect(PixelRect::new(0, 0, 20, 20))];
        let layout = HandleLayout::compute(&outlines, Pos2::new(10.0, 10.0), rotation, &ViewTransform::default(), &cfg);
        (outlines, layout, cfg)
    }

    fn close(a: Pos2, b: Pos2) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn test_scale_handles_on_box() {
        let (_, layout, _) = square_layout(0.0);
        assert_eq!(layout.scale.len(), 8);
        assert!(close(layout.scale[0].1, Pos2::new(0.0, 0.0)));
        assert!(close(layout.scale[3].1, Pos2::new(20.0, 10.0)));
        assert!(close(layout.scale_center, Pos2::new(10.0, 10.0)));
    }

    #[test]
    fn test_rotation_handles_point_outward() {
        let (_, layout, cfg) = square_layout(0.0);
        let off = cfg.rotate_handle_offset / 2f32.sqrt();
        assert!(close(layout.rotate[1], Pos2::new(20.0 + off, -off)));
    }

    #[test]
    fn test_hit_order() {
        let (outlines, layout, cfg) = square_layout(0.0);
        let hit = |p: Pos2| layout.hit_test(p, p, &outlines, &cfg);
        assert_eq!(hit(Pos2::new(10.0, 10.0)), Some(HandleId::Pivot));
        assert_eq!(hit(layout.rotate[2]), Some(HandleId::Rotate(2)));
        assert_eq!(hit(Pos2::new(20.0, 10.0)), Some(HandleId::Scale(ScaleHandle::Right)));
        assert_eq!(hit(Pos2::new(5.0, 16.0)), Some(HandleId::Interior));
        assert_eq!(hit(Pos2::new(40.0, 40.0)), None);
    }

    #[test]
    fn test_rotated_box_handles() {
        // a square turned 45° about its centre: the un-rotated box is the
        // original square again
        let cfg = SelectionConfig::default();
        let c = Pos2::new(5.0, 5.0);
        let square = Outline::from_rect(PixelRect::new(0, 0, 10, 10));
        let diamond = Outline::new(square.points().iter().map(|p| rotate_about(*p, c, 45.0)).collect());
        let layout = HandleLayout::compute(&[diamond], c, 45.0, &ViewTransform::default(), &cfg);
        assert!(close(layout.scale[0].1, rotate_about(Pos2::new(0.0, 0.0), c, 45.0)));
        assert!(close(layout.scale_center, c));
    }

    #[test]
    fn test_separate_pieces_share_one_box() {
        let cfg = SelectionConfig::default();
        let mut mask = crate::canvas::SelectionMask::new(60, 60);
        mask.add_rect(0, 0, 10, 10);
        mask.add_rect(40, 40, 10, 10);
        mask.subtract_rect(44, 44, 2, 2);
        let rings = crate::ops::outline::trace_all_boundaries(&mask);
        assert_eq!(rings.len(), 3);

        let layout = HandleLayout::compute(&rings, Pos2::new(25.0, 25.0), 0.0, &ViewTransform::default(), &cfg);
        // hole vertices get no rotation handle
        assert_eq!(layout.rotate.len(), 8);
        assert!(close(layout.scale[0].1, Pos2::new(0.0, 0.0)));
        assert!(close(layout.scale[4].1, Pos2::new(50.0, 50.0)));

        let hit = |p: Pos2| layout.hit_test(p, p, &rings, &cfg);
        assert_eq!(hit(Pos2::new(42.0, 47.0)), Some(HandleId::Interior));
        assert_eq!(hit(Pos2::new(5.0, 3.0)), Some(HandleId::Interior));
        assert_eq!(hit(Pos2::new(45.0, 45.0)), None);
        assert_eq!(hit(Pos2::new(30.0, 15.0)), None);
    }

    #[test]
    fn test_view_zoom() {
        let view = ViewTransform::new(Pos2::new(100.0, 50.0), 4.0);
        let p = Pos2::new(3.0, 2.5);
        assert_eq!(view.canvas_to_screen(p), Pos2::new(112.0, 60.0));
        assert!(close(view.screen_to_canvas(view.canvas_to_screen(p)), p));
    }
}
