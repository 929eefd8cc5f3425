use egui::{Modifiers, Pos2, Vec2};

use crate::canvas::{PixelBuffer, PixelRect, PixelStore, SelectionMask, SelectionMode};
use crate::components::handles::{HandleId, HandleLayout, ScaleHandle, ViewTransform};
use crate::components::history::HistoryDelta;
use crate::config::SelectionConfig;
use crate::ops::floating::FloatingSelection;
use crate::ops::outline::{build_outlines_with, rings_centroid, rings_contain, Outline};
use crate::ops::resample::Interpolation;
use crate::ops::transform::{snap_degrees, snap_scale, Affine, TransformState};

// ============================================================================
// HOST INTERFACE
// ============================================================================

/// What the controller needs from the document it edits.
pub trait SelectionHost {
    /// The layer commits read from and write to. `None` turns lifting and
    /// committing into logged no-ops.
    fn layer(&mut self) -> Option<&mut dyn PixelStore>;

    /// Receives the before/after bytes of every commit that changed pixels.
    fn record(&mut self, delta: HistoryDelta);

    /// Draw one frame of selection feedback.
    fn render(&mut self, frame: &RenderFrame<'_>) {
        let _ = frame;
    }
}

/// Pointer position in both coordinate spaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    /// Screen/view space, used for handle hit tests.
    pub view: Pos2,
    /// Document pixel space.
    pub doc: Pos2,
}

impl PointerEvent {
    pub fn new(view: Pos2, doc: Pos2) -> Self {
        Self { view, doc }
    }

    /// Event for a document position under `view`.
    pub fn at(view: &ViewTransform, doc: Pos2) -> Self {
        Self { view: view.canvas_to_screen(doc), doc }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionState {
    /// No selection.
    #[default]
    Inactive,
    /// Selection exists, handles hidden.
    Active,
    /// Handles shown and interactive.
    Armed,
    /// A move/rotate/scale/pivot drag is in progress.
    Floating,
}

/// Transformed preview pixels for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct PreviewImage<'a> {
    /// BGRA, `width * height * 4` bytes.
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Integer top-left in document space.
    pub origin: (i32, i32),
    /// Baked-space → document transform.
    pub matrix: Affine,
}

/// Everything a host needs to draw selection feedback.
#[derive(Clone, Copy, Debug)]
pub struct RenderFrame<'a> {
    pub state: SelectionState,
    /// Displayed rings, document space: one per boundary of the selection.
    pub outlines: &'a [Outline],
    pub armed: bool,
    pub floating: bool,
    pub preview: Option<PreviewImage<'a>>,
    /// Present only while armed.
    pub handles: Option<&'a HandleLayout>,
    pub active_handle: Option<HandleId>,
    pub hover_handle: Option<HandleId>,
    /// Rubber band of a marquee drag in progress.
    pub marquee: Option<PixelRect>,
}

// ============================================================================
// GESTURES
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum GestureKind {
    Marquee { mode: SelectionMode, start: Pos2 },
    Move { start: Pos2, start_translation: Vec2 },
    Rotate { pivot: Pos2, anchor: f32, start_rotation: f32 },
    Scale { handle: ScaleHandle, center: Pos2, start_dist: f32, start_scale: (f32, f32) },
    Pivot,
}

#[derive(Clone, Copy, Debug)]
struct Gesture {
    kind: GestureKind,
    /// Transform when the drag began; restored by `cancel`.
    start_transform: TransformState,
    /// Pixels were lifted by this gesture and are dropped on cancel.
    lifted_here: bool,
    prior_state: SelectionState,
    last: Pos2,
}

fn marquee_rect(start: Pos2, end: Pos2) -> PixelRect {
    PixelRect::from_corners(
        start.x.round() as i32,
        start.y.round() as i32,
        end.x.round() as i32,
        end.y.round() as i32,
    )
}

// ============================================================================
// SELECTION CONTROLLER
// ============================================================================

/// Interactive rectangle selection with a floating move/rotate/scale layer.
///
/// Pixels are lifted lazily on the first transform and stay untouched in the
/// layer until `commit`, which stamps them back and hands the host a single
/// reversible [`HistoryDelta`].
pub struct SelectionController<H: SelectionHost> {
    host: H,
    config: SelectionConfig,
    state: SelectionState,
    mask: SelectionMask,
    /// Rings of `mask`, one per outer boundary and hole.
    outlines: Vec<Outline>,
    /// What is drawn and hit-tested: `outlines`, or the floating rings under
    /// the live transform.
    display_outlines: Vec<Outline>,
    transform: TransformState,
    floating: Option<FloatingSelection>,
    interpolation: Interpolation,
    view: ViewTransform,
    modifiers: Modifiers,
    gesture: Option<Gesture>,
    handles: HandleLayout,
    active_handle: Option<HandleId>,
    hover_handle: Option<HandleId>,
}

impl<H: SelectionHost> SelectionController<H> {
    pub fn new(host: H, width: u32, height: u32) -> Self {
        Self::with_config(host, width, height, SelectionConfig::default())
    }

    pub fn with_config(host: H, width: u32, height: u32, config: SelectionConfig) -> Self {
        Self {
            host,
            interpolation: config.interpolation,
            transform: TransformState::with_min_scale(config.min_scale),
            config,
            state: SelectionState::Inactive,
            mask: SelectionMask::new(width, height),
            outlines: Vec::new(),
            display_outlines: Vec::new(),
            floating: None,
            view: ViewTransform::default(),
            modifiers: Modifiers::NONE,
            gesture: None,
            handles: HandleLayout::default(),
            active_handle: None,
            hover_handle: None,
        }
    }

    // ------------------------------------------------------------------
    //  Accessors
    // ------------------------------------------------------------------

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn mask(&self) -> &SelectionMask {
        &self.mask
    }

    /// Displayed rings (document space).
    pub fn outline(&self) -> &[Outline] {
        &self.display_outlines
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SelectionState::Armed | SelectionState::Floating)
    }

    pub fn is_floating(&self) -> bool {
        self.floating.is_some()
    }

    pub fn is_dragging(&self) -> bool {
        self.gesture.is_some()
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn floating(&self) -> Option<&FloatingSelection> {
        self.floating.as_ref()
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    /// Transformed preview pixels, rebuilt only when scale, rotation, pivot
    /// or interpolation changed.
    pub fn preview(&mut self) -> Option<&PixelBuffer> {
        let t = self.transform;
        self.floating.as_mut().map(|f| f.preview(&t))
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        self.active_handle
    }

    pub fn hover_handle(&self) -> Option<HandleId> {
        self.hover_handle
    }

    pub fn handles(&self) -> Option<&HandleLayout> {
        self.is_armed().then_some(&self.handles)
    }

    /// Handle (or interior) under a pointer position, ignoring any drag.
    pub fn hit_test(&self, ev: PointerEvent) -> Option<HandleId> {
        if !self.is_armed() {
            return None;
        }
        self.handles.hit_test(ev.view, ev.doc, &self.display_outlines, &self.config)
    }

    // ------------------------------------------------------------------
    //  Configuration
    // ------------------------------------------------------------------

    pub fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
        self.refresh();
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
        if let Some(floating) = self.floating.as_mut() {
            floating.set_interpolation(interpolation);
        }
    }

    /// Modifier changes mid-drag re-evaluate the drag at the last pointer
    /// position, so snapping toggles without moving the mouse.
    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        if self.modifiers == modifiers {
            return;
        }
        self.modifiers = modifiers;
        if let Some(last) = self.gesture.map(|g| g.last) {
            self.apply_drag(last);
        }
    }

    /// New document size. Drops the selection and any floating pixels.
    pub fn resize_document(&mut self, width: u32, height: u32) {
        self.clear();
        self.mask.resize(width, height);
    }

    // ------------------------------------------------------------------
    //  Pointer input
    // ------------------------------------------------------------------

    /// Returns true when the press was consumed by the selection tool.
    pub fn on_press(&mut self, ev: PointerEvent, modifiers: Modifiers) -> bool {
        self.modifiers = modifiers;
        if self.gesture.is_some() {
            return true;
        }

        if modifiers.shift || modifiers.alt {
            self.commit_floating();
            let mode = if modifiers.shift { SelectionMode::Add } else { SelectionMode::Subtract };
            self.begin_marquee(ev.doc, mode);
            self.refresh();
            return true;
        }

        match self.state {
            SelectionState::Inactive => self.begin_marquee(ev.doc, SelectionMode::Replace),
            SelectionState::Active => {
                if rings_contain(&self.display_outlines, ev.doc, self.config.hit_epsilon) {
                    self.set_state(SelectionState::Armed);
                    self.begin_transform(HandleId::Interior, ev.doc);
                } else {
                    self.clear();
                    self.begin_marquee(ev.doc, SelectionMode::Replace);
                }
            }
            SelectionState::Armed | SelectionState::Floating => {
                match self.handles.hit_test(ev.view, ev.doc, &self.display_outlines, &self.config) {
                    Some(handle) => self.begin_transform(handle, ev.doc),
                    None => {
                        self.commit_floating();
                        if !self.mask.is_empty() {
                            self.set_state(SelectionState::Active);
                        }
                    }
                }
            }
        }
        self.refresh();
        true
    }

    /// Returns true while a drag is in progress. Without a drag, only the
    /// hover handle is updated.
    pub fn on_move(&mut self, ev: PointerEvent) -> bool {
        if self.gesture.is_none() {
            self.hover_handle = self.hit_test(ev);
            return false;
        }
        self.apply_drag(ev.doc);
        true
    }

    pub fn on_release(&mut self, ev: PointerEvent) -> bool {
        if self.gesture.is_none() {
            return false;
        }
        self.apply_drag(ev.doc);
        self.finish_gesture();
        true
    }

    /// Abort the drag in progress: the transform returns to where it was at
    /// press, and pixels lifted by the drag are dropped.
    pub fn cancel(&mut self) -> bool {
        let Some(gesture) = self.gesture.take() else {
            return false;
        };
        self.active_handle = None;
        match gesture.kind {
            GestureKind::Marquee { .. } => self.set_state(gesture.prior_state),
            _ => {
                self.transform = gesture.start_transform;
                if gesture.lifted_here {
                    self.floating = None;
                }
                self.set_state(SelectionState::Armed);
            }
        }
        log::debug!("Selection: gesture cancelled");
        self.refresh();
        true
    }

    fn begin_marquee(&mut self, doc: Pos2, mode: SelectionMode) {
        self.gesture = Some(Gesture {
            kind: GestureKind::Marquee { mode, start: doc },
            start_transform: self.transform,
            lifted_here: false,
            prior_state: self.state,
            last: doc,
        });
        self.active_handle = None;
    }

    fn begin_transform(&mut self, handle: HandleId, doc: Pos2) {
        let was_floating = self.floating.is_some();
        if handle != HandleId::Pivot && !self.ensure_lifted() {
            return;
        }

        let kind = match handle {
            HandleId::Pivot => GestureKind::Pivot,
            HandleId::Interior => GestureKind::Move {
                start: doc,
                start_translation: self.transform.translation(),
            },
            HandleId::Rotate(_) => {
                let pivot = self.handles.pivot_doc;
                let d = doc - pivot;
                GestureKind::Rotate {
                    pivot,
                    anchor: d.y.atan2(d.x),
                    start_rotation: self.transform.rotation_deg(),
                }
            }
            HandleId::Scale(scale_handle) => {
                let center = self.handles.scale_center;
                GestureKind::Scale {
                    handle: scale_handle,
                    center,
                    start_dist: doc.distance(center),
                    start_scale: self.transform.scale(),
                }
            }
        };

        self.gesture = Some(Gesture {
            kind,
            start_transform: self.transform,
            lifted_here: !was_floating && self.floating.is_some(),
            prior_state: self.state,
            last: doc,
        });
        self.active_handle = Some(handle);
        self.set_state(SelectionState::Floating);
    }

    fn apply_drag(&mut self, doc: Pos2) {
        let Some(gesture) = self.gesture.as_mut() else {
            return;
        };
        gesture.last = doc;
        let kind = gesture.kind;
        let coarse = self.modifiers.ctrl || self.modifiers.command;

        match kind {
            GestureKind::Marquee { .. } => {}
            GestureKind::Move { start, start_translation } => {
                let d = doc - start;
                self.transform
                    .set_translation(start_translation + Vec2::new(d.x.round(), d.y.round()));
            }
            GestureKind::Rotate { pivot, anchor, start_rotation } => {
                let d = doc - pivot;
                if d.length() > 1e-3 {
                    let delta = (d.y.atan2(d.x) - anchor).to_degrees();
                    let step = if coarse { self.config.rotate_coarse_step_deg } else { self.config.rotate_step_deg };
                    self.transform.set_rotation(snap_degrees(start_rotation + delta, step));
                }
            }
            GestureKind::Scale { handle, center, start_dist, start_scale } => {
                let ratio = if start_dist < 1e-6 {
                    1.0
                } else {
                    snap_scale(doc.distance(center) / start_dist, self.config.scale_step, self.config.min_scale)
                };
                // ctrl turns edge handles into uniform scaling
                let (ax, ay) = if coarse { (true, true) } else { handle.axes() };
                let sx = if ax { start_scale.0 * ratio } else { start_scale.0 };
                let sy = if ay { start_scale.1 * ratio } else { start_scale.1 };
                self.transform.set_scale(sx, sy);
            }
            GestureKind::Pivot => {
                let pivot = doc - self.transform.translation();
                self.transform.set_pivot(Some(pivot));
            }
        }
        self.refresh();
    }

    fn finish_gesture(&mut self) {
        let Some(gesture) = self.gesture.take() else {
            return;
        };
        self.active_handle = None;
        match gesture.kind {
            GestureKind::Marquee { mode, start } => {
                self.finish_marquee(mode, marquee_rect(start, gesture.last), gesture.prior_state)
            }
            GestureKind::Rotate { .. } | GestureKind::Scale { .. } => {
                self.bake_live();
                self.set_state(SelectionState::Armed);
            }
            GestureKind::Move { .. } | GestureKind::Pivot => self.set_state(SelectionState::Armed),
        }
        self.refresh();
    }

    fn finish_marquee(&mut self, mode: SelectionMode, rect: PixelRect, prior_state: SelectionState) {
        if rect.is_empty() {
            self.set_state(prior_state);
            return;
        }
        self.mask.apply_rect(rect, mode);
        self.outlines = self.trace_mask();
        self.transform.reset();
        log::info!(
            "Selection: {} {}x{} at ({}, {}), {} pixels selected",
            mode.label(),
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            self.mask.count()
        );
        if self.mask.is_empty() {
            self.set_state(SelectionState::Inactive);
        } else {
            self.set_state(SelectionState::Active);
            self.set_state(SelectionState::Armed);
        }
    }

    // ------------------------------------------------------------------
    //  Programmatic operations
    // ------------------------------------------------------------------

    /// Replace the selection with a rectangle (clipped to the document). Any
    /// floating pixels are committed first. The new selection is Active;
    /// call [`arm`](Self::arm) to show handles.
    pub fn select_rect(&mut self, x: i32, y: i32, width: u32, height: u32) -> bool {
        self.commit();
        let rect = PixelRect::new(x, y, width, height).clamp_to(self.mask.width(), self.mask.height());
        if rect.is_empty() {
            self.clear();
            return false;
        }
        self.mask.apply_rect(rect, SelectionMode::Replace);
        self.outlines = vec![Outline::from_rect(rect)];
        self.transform.reset();
        self.set_state(SelectionState::Active);
        self.refresh();
        true
    }

    pub fn select_all(&mut self) -> bool {
        self.select_rect(0, 0, self.mask.width(), self.mask.height())
    }

    /// Deselect. Floating pixels that were never committed are discarded;
    /// the layer still holds the originals.
    pub fn clear(&mut self) {
        self.gesture = None;
        self.active_handle = None;
        self.hover_handle = None;
        if self.floating.take().is_some() {
            log::debug!("Selection: discarded uncommitted floating pixels");
        }
        self.mask.clear();
        self.outlines.clear();
        self.transform.reset();
        self.set_state(SelectionState::Inactive);
        self.refresh();
    }

    /// Show handles for an Active selection.
    pub fn arm(&mut self) -> bool {
        if self.state != SelectionState::Active {
            return false;
        }
        self.set_state(SelectionState::Armed);
        self.refresh();
        true
    }

    /// Finish any drag, then stamp floating pixels into the layer. Returns
    /// true when pixels were written.
    pub fn commit(&mut self) -> bool {
        if self.gesture.is_some() {
            self.finish_gesture();
        }
        let committed = self.commit_floating();
        self.refresh();
        committed
    }

    /// Rotate by `deg` (positive is clockwise on screen) about the pivot and
    /// bake immediately.
    pub fn rotate_by(&mut self, deg: f32) -> bool {
        if !self.prepare_transform() {
            return false;
        }
        self.transform.add_rotation(deg);
        self.bake_live();
        self.refresh();
        true
    }

    /// Multiply the scale along the content's own axes and bake.
    pub fn scale_by(&mut self, sx: f32, sy: f32) -> bool {
        if !self.prepare_transform() {
            return false;
        }
        let (cx, cy) = self.transform.scale();
        self.transform.set_scale(cx * sx, cy * sy);
        self.bake_live();
        self.refresh();
        true
    }

    pub fn translate_by(&mut self, dx: f32, dy: f32) -> bool {
        if !self.prepare_transform() {
            return false;
        }
        self.transform.translate_by(Vec2::new(dx, dy));
        self.refresh();
        true
    }

    /// Place the pivot at a displayed document position.
    pub fn set_pivot(&mut self, pivot: Pos2) -> bool {
        if self.state == SelectionState::Inactive {
            return false;
        }
        let pivot = pivot - self.transform.translation();
        self.transform.set_pivot(Some(pivot));
        self.refresh();
        true
    }

    /// Return the pivot to the centroid of the selection.
    pub fn reset_pivot(&mut self) {
        self.transform.set_pivot(None);
        self.refresh();
    }

    // ------------------------------------------------------------------
    //  Rendering
    // ------------------------------------------------------------------

    pub fn render_frame(&mut self) -> RenderFrame<'_> {
        build_frame(
            self.state,
            &mut self.floating,
            &self.transform,
            &self.display_outlines,
            &self.handles,
            self.gesture.as_ref(),
            self.active_handle,
            self.hover_handle,
        )
    }

    /// Hand the current frame to the host.
    pub fn present(&mut self) {
        let frame = build_frame(
            self.state,
            &mut self.floating,
            &self.transform,
            &self.display_outlines,
            &self.handles,
            self.gesture.as_ref(),
            self.active_handle,
            self.hover_handle,
        );
        self.host.render(&frame);
    }

    // ------------------------------------------------------------------
    //  Internals
    // ------------------------------------------------------------------

    fn set_state(&mut self, state: SelectionState) {
        if self.state != state {
            log::debug!("Selection: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn trace_mask(&self) -> Vec<Outline> {
        build_outlines_with(&self.mask, self.config.outline_mode, self.config.simplify_epsilon)
    }

    /// Finish any drag and make sure pixels are floating.
    fn prepare_transform(&mut self) -> bool {
        if self.state == SelectionState::Inactive {
            return false;
        }
        if self.gesture.is_some() {
            self.finish_gesture();
        }
        self.ensure_lifted()
    }

    fn ensure_lifted(&mut self) -> bool {
        if self.floating.is_some() {
            return true;
        }
        if self.mask.is_empty() {
            return false;
        }
        let Some(store) = self.host.layer() else {
            log::warn!("Selection: no active layer, nothing to lift");
            return false;
        };
        self.floating = FloatingSelection::lift(&*store, &self.mask, &self.outlines, self.interpolation);
        self.floating.is_some()
    }

    fn bake_live(&mut self) {
        let Some(floating) = self.floating.as_mut() else {
            return;
        };
        let pivot = floating.pivot(&self.transform);
        floating.bake(
            &mut self.transform,
            pivot,
            self.config.outline_mode,
            self.config.simplify_epsilon,
        );
    }

    /// Stamp the floating pixels: clear the lift area, composite the baked
    /// buffer at its destination, emit one delta, and select what landed.
    fn commit_floating(&mut self) -> bool {
        if self.floating.is_none() {
            return false;
        }
        self.bake_live();
        let Some(floating) = self.floating.as_ref() else {
            return false;
        };
        let (doc_w, doc_h) = (self.mask.width(), self.mask.height());
        let Some(store) = self.host.layer() else {
            log::warn!("Selection: no active layer, commit skipped");
            return false;
        };

        let region = floating.stamp_region(&self.transform, doc_w, doc_h);
        let before = store.read_rect(region);
        let mut after = before.clone();
        floating.compose_into(region, &mut after, &self.transform);
        store.write_rect(region, &after);

        let stamped = floating.stamped_mask(&self.transform, doc_w, doc_h);
        let delta = HistoryDelta::new("Commit Selection", region, before, after);
        if delta.is_noop() {
            log::debug!("Selection: commit left pixels unchanged");
        } else {
            self.host.record(delta);
        }

        self.floating = None;
        self.mask = stamped;
        self.outlines = self.trace_mask();
        self.transform.reset();
        log::info!(
            "Selection: committed {}x{} region at ({}, {}), {} pixels selected",
            region.width,
            region.height,
            region.x,
            region.y,
            self.mask.count()
        );

        if self.mask.is_empty() {
            self.set_state(SelectionState::Inactive);
        } else if self.state == SelectionState::Floating {
            self.set_state(SelectionState::Armed);
        }
        true
    }

    /// Recompute the displayed rings and handle layout.
    fn refresh(&mut self) {
        let t = self.transform;
        let (outlines, pivot) = match &self.floating {
            Some(floating) => {
                let pivot = floating.pivot(&t);
                (floating.display_outlines(&t, pivot), pivot + t.translation())
            }
            None => {
                let pivot = t.pivot().unwrap_or_else(|| rings_centroid(&self.outlines));
                (self.outlines.clone(), pivot + t.translation())
            }
        };
        self.handles = HandleLayout::compute(&outlines, pivot, t.total_rotation_deg(), &self.view, &self.config);
        self.display_outlines = outlines;
    }
}

#[allow(clippy::too_many_arguments)]
fn build_frame<'a>(
    state: SelectionState,
    floating: &'a mut Option<FloatingSelection>,
    transform: &TransformState,
    outlines: &'a [Outline],
    handles: &'a HandleLayout,
    gesture: Option<&Gesture>,
    active_handle: Option<HandleId>,
    hover_handle: Option<HandleId>,
) -> RenderFrame<'a> {
    let armed = matches!(state, SelectionState::Armed | SelectionState::Floating);
    let is_floating = floating.is_some();
    let preview = floating.as_mut().map(|f| {
        let pivot = f.pivot(transform);
        let placement = f.placement(transform, pivot);
        let buffer = f.preview(transform);
        PreviewImage {
            bytes: buffer.bytes(),
            width: buffer.width(),
            height: buffer.height(),
            origin: placement.origin,
            matrix: placement.matrix,
        }
    });
    let marquee = gesture.and_then(|g| match g.kind {
        GestureKind::Marquee { start, .. } => Some(marquee_rect(start, g.last)),
        _ => None,
    });

    RenderFrame {
        state,
        outlines,
        armed,
        floating: is_floating,
        preview,
        handles: armed.then_some(handles),
        active_handle,
        hover_handle,
        marquee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;

    struct TestHost {
        layer: Option<Layer>,
        deltas: Vec<HistoryDelta>,
        frames: Vec<(usize, bool, Option<PixelRect>)>,
    }

    impl SelectionHost for TestHost {
        fn layer(&mut self) -> Option<&mut dyn PixelStore> {
            self.layer.as_mut().map(|l| l as &mut dyn PixelStore)
        }

        fn record(&mut self, delta: HistoryDelta) {
            self.deltas.push(delta);
        }

        fn render(&mut self, frame: &RenderFrame<'_>) {
            let vertices = frame.outlines.iter().map(Outline::len).sum();
            self.frames.push((vertices, frame.handles.is_some(), frame.marquee));
        }
    }

    fn gradient_layer(w: u32, h: u32) -> Layer {
        let mut layer = Layer::new("test", w, h);
        for y in 0..h {
            for x in 0..w {
                layer.pixels.put_pixel(x, y, [x as u8, y as u8, 100, 255]);
            }
        }
        layer
    }

    fn controller(w: u32, h: u32) -> SelectionController<TestHost> {
        let host = TestHost { layer: Some(gradient_layer(w, h)), deltas: Vec::new(), frames: Vec::new() };
        SelectionController::new(host, w, h)
    }

    fn at(x: f32, y: f32) -> PointerEvent {
        PointerEvent::new(Pos2::new(x, y), Pos2::new(x, y))
    }

    fn drag(c: &mut SelectionController<TestHost>, from: (f32, f32), to: (f32, f32), mods: Modifiers) {
        c.on_press(at(from.0, from.1), mods);
        c.on_move(at(to.0, to.1));
        c.on_release(at(to.0, to.1));
    }

    fn layer_px(c: &SelectionController<TestHost>, x: i32, y: i32) -> [u8; 4] {
        c.host().layer.as_ref().map(|l| l.pixels.pixel(x, y)).unwrap_or_default()
    }

    #[test]
    fn test_marquee_arms() {
        let mut c = controller(32, 32);
        drag(&mut c, (1.0, 1.0), (6.0, 6.0), Modifiers::NONE);
        assert_eq!(c.state(), SelectionState::Armed);
        assert_eq!(c.mask().count(), 25);
        assert_eq!(c.outline(), &[Outline::from_rect(PixelRect::new(1, 1, 5, 5))]);
        assert!(c.handles().is_some());
    }

    #[test]
    fn test_click_without_drag_selects_nothing() {
        let mut c = controller(16, 16);
        drag(&mut c, (3.0, 3.0), (3.2, 3.1), Modifiers::NONE);
        assert_eq!(c.state(), SelectionState::Inactive);
        assert!(c.mask().is_empty());
    }

    #[test]
    fn test_press_outside_dearms_then_clears() {
        let mut c = controller(32, 32);
        drag(&mut c, (1.0, 1.0), (6.0, 6.0), Modifiers::NONE);

        c.on_press(at(25.0, 25.0), Modifiers::NONE);
        c.on_release(at(25.0, 25.0));
        assert_eq!(c.state(), SelectionState::Active);
        assert_eq!(c.mask().count(), 25);
        assert!(c.handles().is_none());

        c.on_press(at(25.0, 25.0), Modifiers::NONE);
        c.on_release(at(25.0, 25.0));
        assert_eq!(c.state(), SelectionState::Inactive);
        assert!(c.mask().is_empty());
    }

    #[test]
    fn test_press_inside_active_rearms_and_moves() {
        let mut c = controller(64, 64);
        assert!(c.select_rect(0, 0, 30, 30));
        assert_eq!(c.state(), SelectionState::Active);

        c.on_press(at(6.0, 12.0), Modifiers::NONE);
        assert_eq!(c.state(), SelectionState::Floating);
        assert_eq!(c.active_handle(), Some(HandleId::Interior));
        c.on_release(at(8.0, 12.0));
        assert_eq!(c.state(), SelectionState::Armed);
        assert_eq!(c.transform().translation(), Vec2::new(2.0, 0.0));
    }

    #[test]
    fn test_shift_adds_alt_subtracts() {
        let mut c = controller(32, 32);
        drag(&mut c, (0.0, 0.0), (4.0, 4.0), Modifiers::NONE);
        drag(&mut c, (2.0, 2.0), (6.0, 6.0), Modifiers::SHIFT);
        assert_eq!(c.mask().count(), 28);

        drag(&mut c, (0.0, 0.0), (6.0, 3.0), Modifiers::ALT);
        assert_eq!(c.mask().count(), 28 - 4 * 3 - 2);
        assert_eq!(c.state(), SelectionState::Armed);

        // subtracting everything leaves nothing selected
        drag(&mut c, (0.0, 0.0), (10.0, 10.0), Modifiers::ALT);
        assert_eq!(c.state(), SelectionState::Inactive);
    }

    #[test]
    fn test_degenerate_add_restores_prior_state() {
        let mut c = controller(32, 32);
        drag(&mut c, (0.0, 0.0), (4.0, 4.0), Modifiers::NONE);
        drag(&mut c, (10.0, 10.0), (10.0, 10.0), Modifiers::SHIFT);
        assert_eq!(c.state(), SelectionState::Armed);
        assert_eq!(c.mask().count(), 16);
    }

    #[test]
    fn test_move_snaps_to_whole_pixels_and_commits() {
        let mut c = controller(40, 40);
        c.select_rect(0, 0, 30, 30);
        c.arm();

        c.on_press(at(6.0, 12.0), Modifiers::NONE);
        c.on_move(at(9.4, 13.6));
        assert_eq!(c.transform().translation(), Vec2::new(3.0, 2.0));
        c.on_release(at(9.4, 13.6));
        assert!(c.is_floating());
        // the layer is untouched until commit
        assert_eq!(layer_px(&c, 0, 0), [0, 0, 100, 255]);

        assert!(c.commit());
        assert!(!c.is_floating());
        assert_eq!(layer_px(&c, 0, 0), [0; 4]);
        assert_eq!(layer_px(&c, 3, 2), [0, 0, 100, 255]);
        assert_eq!(c.mask().bounds(), Some(PixelRect::new(3, 2, 30, 30)));
        assert_eq!(c.host().deltas.len(), 1);
        assert_eq!(c.host().deltas[0].bounds, PixelRect::new(0, 0, 33, 32));
        assert!(c.transform().is_identity());
    }

    #[test]
    fn test_rotate_handle_drag_snaps() {
        let mut c = controller(64, 64);
        c.select_rect(10, 10, 10, 10);
        c.arm();
        let handle = c.handles().map(|h| h.rotate[1]).unwrap_or_default();
        let pivot = Pos2::new(15.0, 15.0);

        c.on_press(PointerEvent::new(handle, handle), Modifiers::NONE);
        assert_eq!(c.active_handle(), Some(HandleId::Rotate(1)));

        // the handle starts at -45°; drag to +5°
        let a = 5f32.to_radians();
        let p = pivot + Vec2::new(a.cos(), a.sin()) * 20.0;
        c.on_move(at(p.x, p.y));
        assert!((c.transform().rotation_deg() - 50.0).abs() < 1e-3);

        c.set_modifiers(Modifiers::CTRL);
        assert!((c.transform().rotation_deg() - 45.0).abs() < 1e-3);

        c.on_release(at(p.x, p.y));
        assert_eq!(c.state(), SelectionState::Armed);
        assert_eq!(c.transform().rotation_deg(), 0.0);
        assert!((c.transform().cumulative_rotation_deg() - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_edge_handle_scales_one_axis() {
        let mut c = controller(40, 40);
        c.select_rect(0, 0, 20, 20);
        c.arm();

        c.on_press(at(20.0, 10.0), Modifiers::NONE);
        assert_eq!(c.active_handle(), Some(HandleId::Scale(ScaleHandle::Right)));
        c.on_move(at(25.0, 10.0));
        let (sx, sy) = c.transform().scale();
        assert!((sx - 1.5).abs() < 1e-4);
        assert_eq!(sy, 1.0);

        c.on_release(at(25.0, 10.0));
        let baked = c.floating().map(|f| (f.baked().width(), f.baked().height()));
        assert_eq!(baked, Some((30, 20)));
    }

    #[test]
    fn test_ctrl_edge_handle_scales_uniformly() {
        let mut c = controller(40, 40);
        c.select_rect(0, 0, 20, 20);
        c.arm();

        c.on_press(at(20.0, 10.0), Modifiers::CTRL);
        assert_eq!(c.active_handle(), Some(HandleId::Scale(ScaleHandle::Right)));
        c.on_move(at(25.0, 10.0));
        let (sx, sy) = c.transform().scale();
        assert!((sx - 1.5).abs() < 1e-4);
        assert!((sy - 1.5).abs() < 1e-4);

        c.on_release(at(25.0, 10.0));
        let baked = c.floating().map(|f| (f.baked().width(), f.baked().height()));
        assert_eq!(baked, Some((30, 30)));
    }

    #[test]
    fn test_pivot_drag_then_corner_scale() {
        let mut c = controller(64, 64);
        c.select_rect(10, 10, 20, 20);
        c.arm();

        c.on_press(at(20.0, 20.0), Modifiers::NONE);
        assert_eq!(c.active_handle(), Some(HandleId::Pivot));
        assert_eq!(c.state(), SelectionState::Floating);
        c.on_move(at(10.0, 10.0));
        c.on_release(at(10.0, 10.0));
        assert_eq!(c.state(), SelectionState::Armed);
        // moving the pivot never lifts pixels
        assert!(!c.is_floating());
        assert_eq!(c.transform().pivot(), Some(Pos2::new(10.0, 10.0)));
        assert_eq!(c.handles().map(|h| h.pivot_doc), Some(Pos2::new(10.0, 10.0)));

        c.on_press(at(30.0, 30.0), Modifiers::NONE);
        assert_eq!(c.active_handle(), Some(HandleId::Scale(ScaleHandle::BottomRight)));
        c.on_move(at(35.0, 35.0));
        let (sx, sy) = c.transform().scale();
        assert!((sx - 1.5).abs() < 1e-4);
        assert!((sy - 1.5).abs() < 1e-4);

        c.on_release(at(35.0, 35.0));
        assert_eq!(c.transform().baked_scale(), (1.5, 1.5));
        // scaled about the dragged pivot, which stays fixed
        assert_eq!(c.outline(), &[Outline::from_rect(PixelRect::new(10, 10, 30, 30))]);
    }

    #[test]
    fn test_rotation_orbits_off_centre_pivot() {
        let mut c = controller(16, 16);
        c.select_rect(4, 4, 4, 4);
        assert!(c.set_pivot(Pos2::new(8.0, 8.0)));
        assert!(c.rotate_by(90.0));
        assert!(c.commit());

        assert_eq!(c.mask().bounds(), Some(PixelRect::new(8, 4, 4, 4)));
        assert_eq!(layer_px(&c, 4, 4), [0; 4]);
        // clockwise: the bottom-left source pixel lands top-left
        assert_eq!(layer_px(&c, 8, 4), [4, 7, 100, 255]);
    }

    #[test]
    fn test_shift_added_piece_is_interior() {
        let mut c = controller(64, 64);
        drag(&mut c, (0.0, 0.0), (4.0, 4.0), Modifiers::NONE);
        drag(&mut c, (30.0, 30.0), (40.0, 40.0), Modifiers::SHIFT);
        assert_eq!(c.mask().count(), 116);
        assert_eq!(
            c.outline(),
            &[
                Outline::from_rect(PixelRect::new(0, 0, 4, 4)),
                Outline::from_rect(PixelRect::new(30, 30, 10, 10)),
            ]
        );
        assert_eq!(c.hit_test(at(38.0, 32.0)), Some(HandleId::Interior));
        assert_eq!(c.hit_test(at(20.0, 8.0)), None);

        c.on_press(at(38.0, 32.0), Modifiers::NONE);
        assert_eq!(c.state(), SelectionState::Floating);
        assert_eq!(c.active_handle(), Some(HandleId::Interior));
        c.on_release(at(40.0, 32.0));
        assert!(c.commit());

        // both pieces moved together and both are still selected
        assert_eq!(c.mask().count(), 116);
        assert_eq!(c.mask().bounds(), Some(PixelRect::new(2, 0, 40, 40)));
        assert_eq!(c.outline().len(), 2);
        assert_eq!(c.state(), SelectionState::Armed);
    }

    #[test]
    fn test_rotation_keeps_separate_pieces() {
        let mut c = controller(64, 64);
        drag(&mut c, (0.0, 0.0), (4.0, 4.0), Modifiers::NONE);
        drag(&mut c, (30.0, 30.0), (40.0, 40.0), Modifiers::SHIFT);
        assert!(c.rotate_by(90.0));
        assert_eq!(c.outline().len(), 2);
        assert!(c.commit());
        assert_eq!(c.mask().count(), 116);
        assert_eq!(c.outline().len(), 2);
    }

    #[test]
    fn test_configured_min_scale_applies() {
        let host = TestHost { layer: Some(gradient_layer(32, 32)), deltas: Vec::new(), frames: Vec::new() };
        let config = SelectionConfig { min_scale: 0.5, ..SelectionConfig::default() };
        let mut c = SelectionController::with_config(host, 32, 32, config);
        c.select_rect(0, 0, 20, 20);
        assert!(c.scale_by(0.25, 0.25));
        assert_eq!(c.transform().baked_scale(), (0.5, 0.5));
        let baked = c.floating().map(|f| (f.baked().width(), f.baked().height()));
        assert_eq!(baked, Some((10, 10)));
    }

    #[test]
    fn test_resize_document_drops_selection() {
        let mut c = controller(32, 32);
        c.select_rect(0, 0, 8, 8);
        c.translate_by(4.0, 0.0);
        assert!(c.is_floating());

        c.resize_document(16, 12);
        assert_eq!(c.state(), SelectionState::Inactive);
        assert!(!c.is_floating());
        assert_eq!((c.mask().width(), c.mask().height()), (16, 12));
        assert!(c.outline().is_empty());
        // the uncommitted move never reached the layer
        assert_eq!(layer_px(&c, 0, 0), [0, 0, 100, 255]);
    }

    #[test]
    fn test_cancel_restores_and_drops_lift() {
        let mut c = controller(40, 40);
        c.select_rect(0, 0, 30, 30);
        c.arm();
        c.on_press(at(6.0, 12.0), Modifiers::NONE);
        c.on_move(at(16.0, 12.0));
        assert!(c.is_dragging());
        assert!(c.cancel());
        assert!(!c.is_dragging());
        assert_eq!(c.state(), SelectionState::Armed);
        assert!(!c.is_floating());
        assert_eq!(c.transform().translation(), Vec2::ZERO);
        assert!(!c.cancel());
    }

    #[test]
    fn test_no_layer_is_a_noop() {
        let host = TestHost { layer: None, deltas: Vec::new(), frames: Vec::new() };
        let mut c = SelectionController::new(host, 16, 16);
        c.select_rect(2, 2, 4, 4);
        assert!(!c.translate_by(2.0, 0.0));
        assert!(!c.commit());
        assert!(c.host().deltas.is_empty());
        assert_eq!(c.mask().count(), 16);
    }

    #[test]
    fn test_hover_and_present() {
        let mut c = controller(40, 40);
        c.select_rect(0, 0, 20, 20);
        c.on_move(at(20.0, 10.0));
        assert_eq!(c.hover_handle(), None);

        c.arm();
        c.on_move(at(20.0, 10.0));
        assert_eq!(c.hover_handle(), Some(HandleId::Scale(ScaleHandle::Right)));

        c.present();
        // de-arm, then clear and start a marquee
        c.on_press(at(38.0, 5.0), Modifiers::NONE);
        c.on_press(at(38.0, 5.0), Modifiers::NONE);
        c.on_move(at(35.0, 8.0));
        c.present();
        let frames = &c.host().frames;
        assert_eq!(frames[0], (4, true, None));
        assert_eq!(frames[1], (0, false, Some(PixelRect::new(35, 5, 3, 3))));
    }

    #[test]
    fn test_preview_follows_interpolation() {
        let mut c = controller(16, 16);
        c.select_rect(0, 0, 4, 2);
        c.rotate_by(90.0);
        let dims = c.preview().map(|p| (p.width(), p.height()));
        assert_eq!(dims, Some((2, 4)));
        c.set_interpolation(Interpolation::Bilinear);
        assert_eq!(c.floating().map(|f| f.interpolation()), Some(Interpolation::Bilinear));
    }
}
