use std::iter::FusedIterator;

use egui::{Pos2, Rect};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::components::history::{HistoryDelta, HistoryManager, PixelDeltaCommand};
use crate::components::selection_tool::{RenderFrame, SelectionHost};
use crate::error::{Result, SelectionError};

// ============================================================================
// PIXEL RECT
// ============================================================================

/// Integer rectangle in document pixels. Empty when either side is zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Normalised rect spanning two corners in any order.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let (min_x, max_x) = (x0.min(x1), x0.max(x1));
        let (min_y, max_y) = (y0.min(y1), y0.max(y1));
        Self::new(min_x, min_y, (max_x - min_x) as u32, (max_y - min_y) as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Overlap of two rects; empty (at `self`'s origin) when they do not meet.
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return PixelRect::new(self.x, self.y, 0, 0);
        }
        PixelRect::from_corners(x0, y0, x1, y1)
    }

    /// Smallest rect covering both. Empty inputs are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        PixelRect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Intersection with a `width` x `height` grid anchored at the origin.
    pub fn clamp_to(&self, width: u32, height: u32) -> PixelRect {
        self.intersect(&PixelRect::new(0, 0, width, height))
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_min_max(
            Pos2::new(self.x as f32, self.y as f32),
            Pos2::new(self.right() as f32, self.bottom() as f32),
        )
    }

    pub fn center(&self) -> Pos2 {
        Pos2::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

// ============================================================================
// PIXEL BUFFER – flat BGRA bytes
// ============================================================================

/// Owned BGRA pixel buffer (4 bytes per pixel, byte order B, G, R, A).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap raw BGRA bytes, checking the length against the dimensions.
    pub fn from_bgra(width: u32, height: u32, bytes: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(SelectionError::BufferSizeMismatch {
                width,
                height,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { width, height, bytes })
    }

    /// Kernel output path: the length is correct by construction.
    pub(crate) fn from_parts(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), width as usize * height as usize * 4);
        if width == 0 || height == 0 {
            return Self::empty();
        }
        Self { width, height, bytes }
    }

    /// Convert from an RGBA image (swaps the R and B channels).
    pub fn from_rgba_image(img: &RgbaImage) -> Self {
        let mut bytes = img.as_raw().clone();
        for px in bytes.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        Self::from_parts(img.width(), img.height(), bytes)
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut bytes = self.bytes.clone();
        for px in bytes.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        // Length is width*height*4 by invariant.
        RgbaImage::from_raw(self.width, self.height, bytes).unwrap_or_default()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// BGRA at (x, y); transparent outside the buffer.
    pub fn pixel(&self, x: i32, y: i32) -> [u8; 4] {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return [0; 4];
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], self.bytes[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.bytes[i..i + 4].copy_from_slice(&bgra);
    }

    /// Number of pixels with non-zero alpha.
    pub fn opaque_count(&self) -> usize {
        self.bytes.chunks_exact(4).filter(|p| p[3] > 0).count()
    }
}

// ============================================================================
// SELECTION SYSTEM
// ============================================================================

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Clear any existing selection, then set the new shape.
    #[default]
    Replace,
    /// Union – add to the existing mask.
    Add,
    /// Difference – subtract from the existing mask.
    Subtract,
    /// Keep only pixels present in both the existing mask AND the new shape.
    Intersect,
}

impl SelectionMode {
    pub fn label(&self) -> &'static str {
        match self {
            SelectionMode::Replace => "Replace",
            SelectionMode::Add => "Add",
            SelectionMode::Subtract => "Subtract",
            SelectionMode::Intersect => "Intersect",
        }
    }
}

/// Per-pixel selection membership – 0 = unselected, 255 = selected.
/// Dimensions always match the document.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionMask {
    pixels: GrayImage,
}

impl SelectionMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self { pixels: GrayImage::new(width, height) }
    }

    /// Mask with a single rectangle selected.
    pub fn from_rect(width: u32, height: u32, rect: PixelRect) -> Self {
        let mut mask = Self::new(width, height);
        mask.apply_rect(rect, SelectionMode::Replace);
        mask
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Match new document dimensions. A size change drops the selection.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width() != width || self.height() != height {
            self.pixels = GrayImage::new(width, height);
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn select_all(&mut self) {
        self.pixels.fill(255);
    }

    pub fn add_rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.apply_rect(rect_from_signed(x, y, w, h), SelectionMode::Add);
    }

    pub fn subtract_rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.apply_rect(rect_from_signed(x, y, w, h), SelectionMode::Subtract);
    }

    pub fn intersect_rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.apply_rect(rect_from_signed(x, y, w, h), SelectionMode::Intersect);
    }

    /// Combine a rectangle with the mask according to `mode`.
    pub fn apply_rect(&mut self, rect: PixelRect, mode: SelectionMode) {
        let clipped = rect.clamp_to(self.width(), self.height());
        match mode {
            SelectionMode::Replace => {
                self.clear();
                self.fill_rect(clipped, 255);
            }
            SelectionMode::Add => self.fill_rect(clipped, 255),
            SelectionMode::Subtract => self.fill_rect(clipped, 0),
            SelectionMode::Intersect => {
                let w = self.width() as i32;
                for y in 0..self.height() as i32 {
                    if y < clipped.y || y >= clipped.bottom() || clipped.is_empty() {
                        self.fill_span(y, 0, w, 0);
                    } else {
                        self.fill_span(y, 0, clipped.x, 0);
                        self.fill_span(y, clipped.right(), w, 0);
                    }
                }
            }
        }
    }

    fn fill_rect(&mut self, clipped: PixelRect, value: u8) {
        if clipped.is_empty() {
            return;
        }
        for y in clipped.y..clipped.bottom() {
            self.fill_span(y, clipped.x, clipped.right(), value);
        }
    }

    /// Set `[x0, x1)` on row `y` to `value`, clamped to the grid.
    fn fill_span(&mut self, y: i32, x0: i32, x1: i32, value: u8) {
        let w = self.width() as i32;
        if y < 0 || y >= self.height() as i32 {
            return;
        }
        let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
        if x1 <= x0 {
            return;
        }
        let row = y as usize * w as usize;
        let raw: &mut [u8] = &mut self.pixels;
        raw[row + x0 as usize..row + x1 as usize].fill(value);
    }

    /// Select the half-open spans `[x0, x1)` on row `y`.
    pub fn fill_spans(&mut self, y: i32, spans: &[(i32, i32)]) {
        for &(x0, x1) in spans {
            self.fill_span(y, x0, x1, 255);
        }
    }

    pub fn set(&mut self, x: i32, y: i32, selected: bool) {
        self.fill_span(y, x, x + 1, if selected { 255 } else { 0 });
    }

    /// Bounds-checked membership query.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return false;
        }
        self.pixels.as_raw()[y as usize * self.width() as usize + x as usize] > 0
    }

    /// Filled coordinates in row-major order. Clone the iterator to restart.
    pub fn filled(&self) -> FilledPixels<'_> {
        FilledPixels { mask: self, index: 0 }
    }

    pub fn count(&self) -> usize {
        self.pixels.iter().filter(|v| **v > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.pixels.iter().any(|v| *v > 0)
    }

    /// Tight bounding box of the selected pixels.
    pub fn bounds(&self) -> Option<PixelRect> {
        let (mw, mh) = (self.width(), self.height());
        let raw = self.pixels.as_raw();
        let mut min_x = mw;
        let mut min_y = mh;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        for y in 0..mh {
            let row = y as usize * mw as usize;
            for x in 0..mw {
                if raw[row + x as usize] > 0 {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        if min_x > max_x {
            return None;
        }
        Some(PixelRect::new(min_x as i32, min_y as i32, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Shift the mask by (dx, dy). Pixels moved off the grid are dropped.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        if dx == 0 && dy == 0 {
            return;
        }
        let (w, h) = (self.width(), self.height());
        let mut shifted = GrayImage::new(w, h);
        for y in 0..h as i32 {
            let sy = y - dy;
            if sy < 0 || sy >= h as i32 {
                continue;
            }
            for x in 0..w as i32 {
                let sx = x - dx;
                if sx >= 0 && sx < w as i32 && self.contains(sx, sy) {
                    shifted.put_pixel(x as u32, y as u32, image::Luma([255]));
                }
            }
        }
        self.pixels = shifted;
    }

    /// Select every pixel of `buffer` whose alpha is non-zero, with the
    /// buffer's top-left placed at `(origin_x, origin_y)`. Works row by row
    /// on runs of opaque pixels. Returns the number of runs written.
    pub fn add_alpha_runs(&mut self, buffer: &PixelBuffer, origin_x: i32, origin_y: i32) -> usize {
        let bw = buffer.width() as usize;
        let bytes = buffer.bytes();
        let mut runs = 0;
        for by in 0..buffer.height() as usize {
            let row = &bytes[by * bw * 4..(by + 1) * bw * 4];
            let mut run_start: Option<usize> = None;
            for bx in 0..=bw {
                let opaque = bx < bw && row[bx * 4 + 3] > 0;
                match (opaque, run_start) {
                    (true, None) => run_start = Some(bx),
                    (false, Some(start)) => {
                        let y = origin_y + by as i32;
                        self.fill_span(y, origin_x + start as i32, origin_x + bx as i32, 255);
                        runs += 1;
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }
        runs
    }
}

fn rect_from_signed(x: i32, y: i32, w: i32, h: i32) -> PixelRect {
    PixelRect::new(x, y, w.max(0) as u32, h.max(0) as u32)
}

/// Row-major iterator over the selected pixels of a [`SelectionMask`].
#[derive(Clone, Debug)]
pub struct FilledPixels<'a> {
    mask: &'a SelectionMask,
    index: usize,
}

impl Iterator for FilledPixels<'_> {
    type Item = (i32, i32);

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.mask.pixels.as_raw();
        let w = self.mask.width() as usize;
        while self.index < raw.len() {
            let i = self.index;
            self.index += 1;
            if raw[i] > 0 {
                return Some(((i % w) as i32, (i / w) as i32));
            }
        }
        None
    }
}

impl FusedIterator for FilledPixels<'_> {}

// ============================================================================
// LAYER PIXEL STORE
// ============================================================================

/// Rectangle-level access to a layer's BGRA pixels.
///
/// The engine calls this only when lifting a selection and when committing.
/// Reads outside the store come back transparent; writes outside are ignored.
pub trait PixelStore {
    fn size(&self) -> (u32, u32);
    fn read_rect(&self, rect: PixelRect) -> Vec<u8>;
    fn write_rect(&mut self, rect: PixelRect, bgra: &[u8]);
}

/// A full-document BGRA layer.
pub struct Layer {
    pub name: String,
    pub pixels: PixelBuffer,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            pixels: PixelBuffer::new(width, height),
        }
    }

    pub fn from_buffer(name: impl Into<String>, pixels: PixelBuffer) -> Self {
        Self { name: name.into(), pixels }
    }
}

impl PixelStore for Layer {
    fn size(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    fn read_rect(&self, rect: PixelRect) -> Vec<u8> {
        let mut out = vec![0u8; rect.area() * 4];
        let visible = rect.clamp_to(self.pixels.width(), self.pixels.height());
        if visible.is_empty() {
            return out;
        }
        let lw = self.pixels.width() as usize;
        let src = self.pixels.bytes();
        let span = visible.width as usize * 4;
        for y in visible.y..visible.bottom() {
            let src_off = (y as usize * lw + visible.x as usize) * 4;
            let dst_off = ((y - rect.y) as usize * rect.width as usize + (visible.x - rect.x) as usize) * 4;
            out[dst_off..dst_off + span].copy_from_slice(&src[src_off..src_off + span]);
        }
        out
    }

    fn write_rect(&mut self, rect: PixelRect, bgra: &[u8]) {
        if bgra.len() != rect.area() * 4 {
            log::warn!(
                "Layer '{}': write_rect expected {} bytes for {:?}, got {}",
                self.name,
                rect.area() * 4,
                rect,
                bgra.len()
            );
            return;
        }
        let (lw, lh) = (self.pixels.width(), self.pixels.height());
        let visible = rect.clamp_to(lw, lh);
        if visible.is_empty() {
            return;
        }
        let span = visible.width as usize * 4;
        let dst = &mut self.pixels.bytes;
        for y in visible.y..visible.bottom() {
            let dst_off = (y as usize * lw as usize + visible.x as usize) * 4;
            let src_off = ((y - rect.y) as usize * rect.width as usize + (visible.x - rect.x) as usize) * 4;
            dst[dst_off..dst_off + span].copy_from_slice(&bgra[src_off..src_off + span]);
        }
    }
}

// ============================================================================
// CANVAS STATE – in-memory document host
// ============================================================================

/// Minimal document: a stack of layers, an undo history and a frame counter.
/// Implements [`SelectionHost`] so the controller can be driven headlessly.
pub struct CanvasState {
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub width: u32,
    pub height: u32,
    pub history: HistoryManager,
    /// Number of frames handed to `render`.
    pub frames_rendered: u64,
    /// Outline vertex count of the most recent frame, summed over rings.
    pub last_outline_len: usize,
    /// Number of outline rings in the most recent frame.
    pub last_outline_rings: usize,
}

impl CanvasState {
    /// Document with one transparent layer.
    pub fn new(width: u32, height: u32) -> Self {
        let mut state = Self::without_layers(width, height);
        state.layers.push(Layer::new("Background", width, height));
        state
    }

    /// Document with no layers at all; commits against it are no-ops.
    pub fn without_layers(width: u32, height: u32) -> Self {
        Self {
            layers: Vec::new(),
            active_layer_index: 0,
            width,
            height,
            history: HistoryManager::default(),
            frames_rendered: 0,
            last_outline_len: 0,
            last_outline_rings: 0,
        }
    }

    pub fn from_rgba_image(img: &RgbaImage) -> Self {
        let mut state = Self::without_layers(img.width(), img.height());
        state.layers.push(Layer::from_buffer("Background", PixelBuffer::from_rgba_image(img)));
        state
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    pub fn undo(&mut self) -> Option<String> {
        let layer = self.layers.get_mut(self.active_layer_index)?;
        self.history.undo(layer)
    }

    pub fn redo(&mut self) -> Option<String> {
        let layer = self.layers.get_mut(self.active_layer_index)?;
        self.history.redo(layer)
    }
}

impl SelectionHost for CanvasState {
    fn layer(&mut self) -> Option<&mut dyn PixelStore> {
        self.layers
            .get_mut(self.active_layer_index)
            .map(|layer| layer as &mut dyn PixelStore)
    }

    fn record(&mut self, delta: HistoryDelta) {
        self.history.push(Box::new(PixelDeltaCommand::new(delta)));
    }

    fn render(&mut self, frame: &RenderFrame<'_>) {
        self.frames_rendered += 1;
        self.last_outline_rings = frame.outlines.len();
        self.last_outline_len = frame.outlines.iter().map(|ring| ring.len()).sum();
    }
}
