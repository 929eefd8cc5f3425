// ============================================================================
// OUTLINE BUILDER - mask → polygon (convex hull or exact boundary trace)
// ============================================================================

use std::collections::HashSet;

use egui::{Pos2, Rect};
use serde::{Deserialize, Serialize};

use crate::canvas::{PixelRect, SelectionMask};
use crate::ops::transform::Affine;

/// Default area threshold for dropping near-collinear vertices.
pub const DEFAULT_SIMPLIFY_EPSILON: f32 = 0.001;

/// Default epsilon added to the ray-cast edge denominator.
pub const DEFAULT_HIT_EPSILON: f32 = 1e-6;

/// Which algorithm derives the outline from a mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlineMode {
    /// Pixel-exact boundary walk; keeps concavities.
    #[default]
    Trace,
    /// Graham scan; loses concave detail and holes.
    ConvexHull,
}

impl std::str::FromStr for OutlineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(OutlineMode::Trace),
            "hull" | "convex_hull" | "convex" => Ok(OutlineMode::ConvexHull),
            other => Err(format!("unknown outline mode '{other}'")),
        }
    }
}

// ============================================================================
// OUTLINE
// ============================================================================

/// Closed polygon in document-pixel coordinates. The last vertex connects back
/// to the first. Builders emit positive signed area (y down), so a rectangle
/// runs top-left, top-right, bottom-right, bottom-left.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outline {
    points: Vec<Pos2>,
}

impl Outline {
    pub fn new(points: Vec<Pos2>) -> Self {
        Self { points }
    }

    pub fn from_rect(rect: PixelRect) -> Self {
        if rect.is_empty() {
            return Self::default();
        }
        let (x0, y0) = (rect.x as f32, rect.y as f32);
        let (x1, y1) = (rect.right() as f32, rect.bottom() as f32);
        Self::new(vec![
            Pos2::new(x0, y0),
            Pos2::new(x1, y0),
            Pos2::new(x1, y1),
            Pos2::new(x0, y1),
        ])
    }

    pub fn points(&self) -> &[Pos2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterator over `(start, end)` of every edge, closing edge included.
    pub fn edges(&self) -> impl Iterator<Item = (Pos2, Pos2)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Shoelace area. Positive for builder output.
    pub fn signed_area(&self) -> f32 {
        if self.points.len() < 3 {
            return 0.0;
        }
        let twice: f64 = self
            .edges()
            .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
            .sum();
        (twice / 2.0) as f32
    }

    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    /// Area-weighted centroid; the vertex mean when the area is degenerate.
    pub fn centroid(&self) -> Pos2 {
        if self.points.is_empty() {
            return Pos2::ZERO;
        }
        let mut a = 0.0f64;
        let mut cx = 0.0f64;
        let mut cy = 0.0f64;
        for (p, q) in self.edges() {
            let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
            a += cross;
            cx += (p.x as f64 + q.x as f64) * cross;
            cy += (p.y as f64 + q.y as f64) * cross;
        }
        if a.abs() < 1e-9 {
            let n = self.points.len() as f32;
            let sum = self.points.iter().fold(Pos2::ZERO, |acc, p| acc + p.to_vec2());
            return Pos2::new(sum.x / n, sum.y / n);
        }
        Pos2::new((cx / (3.0 * a)) as f32, (cy / (3.0 * a)) as f32)
    }

    pub fn bounds(&self) -> Option<Rect> {
        let first = self.points.first()?;
        let mut rect = Rect::from_min_max(*first, *first);
        for p in &self.points[1..] {
            rect.extend_with(*p);
        }
        Some(rect)
    }

    /// Even-odd ray cast with the default edge epsilon.
    pub fn contains(&self, p: Pos2) -> bool {
        self.contains_eps(p, DEFAULT_HIT_EPSILON)
    }

    /// Even-odd ray cast; `eps` is added to each edge's y-extent before
    /// dividing.
    pub fn contains_eps(&self, p: Pos2, eps: f32) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y + eps) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn transformed(&self, m: &Affine) -> Outline {
        Outline::new(self.points.iter().map(|p| m.transform_point(*p)).collect())
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Outline {
        let v = egui::vec2(dx, dy);
        Outline::new(self.points.iter().map(|p| *p + v).collect())
    }

    /// Every consecutive triple turns the same (positive) way.
    pub fn is_convex(&self) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        (0..n).all(|i| self.turn_at(i) > 0.0)
    }

    /// Indices of vertices with an interior angle above 180 degrees.
    pub fn reflex_vertices(&self) -> Vec<usize> {
        let n = self.points.len();
        if n < 3 {
            return Vec::new();
        }
        (0..n).filter(|&i| self.turn_at(i) < 0.0).collect()
    }

    /// Cross product of the edges entering and leaving vertex `i`.
    fn turn_at(&self, i: usize) -> f32 {
        let n = self.points.len();
        let a = self.points[(i + n - 1) % n];
        let b = self.points[i];
        let c = self.points[(i + 1) % n];
        cross(a, b, c)
    }
}

#[inline]
fn cross(o: Pos2, a: Pos2, b: Pos2) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

#[inline]
fn cross64(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

// ============================================================================
// CONVEX HULL
// ============================================================================

/// Graham-scan hull of the mask, snapped to pixel corners.
///
/// Candidates are the centres of the left-most and right-most filled pixel of
/// every row. Each vertex of the centre hull is expanded to the four corners
/// of its pixel and the corners are re-hulled, so the result encloses every
/// selected pixel and stays strictly convex.
pub fn convex_hull(mask: &SelectionMask) -> Outline {
    let mut centres = Vec::new();
    let mut current_row: Option<(i32, i32, i32)> = None;
    for (x, y) in mask.filled() {
        current_row = match current_row {
            Some((row, min_x, _)) if row == y => Some((row, min_x, x)),
            Some((row, min_x, max_x)) => {
                push_row_extremes(&mut centres, row, min_x, max_x);
                Some((y, x, x))
            }
            None => Some((y, x, x)),
        };
    }
    let Some((row, min_x, max_x)) = current_row else {
        return Outline::default();
    };
    push_row_extremes(&mut centres, row, min_x, max_x);

    let centre_hull = graham_scan(centres);

    let mut corners = Vec::with_capacity(centre_hull.len() * 4);
    for (cx, cy) in centre_hull {
        let (px, py) = ((cx - 0.5).round(), (cy - 0.5).round());
        corners.extend([(px, py), (px + 1.0, py), (px + 1.0, py + 1.0), (px, py + 1.0)]);
    }
    corners.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    corners.dedup();

    let hull = graham_scan(corners);
    if hull.len() < 3 {
        return mask.bounds().map(Outline::from_rect).unwrap_or_default();
    }
    Outline::new(hull.into_iter().map(|(x, y)| Pos2::new(x as f32, y as f32)).collect())
}

fn push_row_extremes(out: &mut Vec<(f64, f64)>, row: i32, min_x: i32, max_x: i32) {
    let cy = row as f64 + 0.5;
    out.push((min_x as f64 + 0.5, cy));
    if max_x != min_x {
        out.push((max_x as f64 + 0.5, cy));
    }
}

/// Graham scan over distinct points. Pops while the turn is not a strict
/// left turn, then removes any collinear vertex left at the closing edge.
fn graham_scan(mut pts: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    if pts.len() < 3 {
        return pts;
    }
    let pivot_idx = pts
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    let pivot = pts.swap_remove(pivot_idx);

    pts.sort_by(|a, b| {
        let angle_a = (a.1 - pivot.1).atan2(a.0 - pivot.0);
        let angle_b = (b.1 - pivot.1).atan2(b.0 - pivot.0);
        let dist_a = (a.0 - pivot.0).powi(2) + (a.1 - pivot.1).powi(2);
        let dist_b = (b.0 - pivot.0).powi(2) + (b.1 - pivot.1).powi(2);
        angle_a
            .partial_cmp(&angle_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(dist_a.partial_cmp(&dist_b).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut hull: Vec<(f64, f64)> = vec![pivot];
    for p in pts {
        while hull.len() >= 2 && cross64(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }

    // Points sharing the final polar angle can leave a collinear tail.
    loop {
        let n = hull.len();
        if n < 3 {
            break;
        }
        let Some(i) = (0..n).find(|&i| cross64(hull[(i + n - 1) % n], hull[i], hull[(i + 1) % n]) <= 0.0) else {
            break;
        };
        hull.remove(i);
    }
    hull
}

// ============================================================================
// BOUNDARY TRACE
// ============================================================================

/// Walker on the pixel-corner lattice. Filled cells stay on its right.
struct Walker<'a> {
    mask: &'a SelectionMask,
}

impl Walker<'_> {
    #[inline]
    fn filled(&self, x: i32, y: i32) -> bool {
        self.mask.contains(x, y)
    }

    /// Outgoing heading at vertex `v` for incoming heading `d`.
    ///
    /// Ahead-left filled → turn left (this also crosses diagonal-only
    /// joins); ahead-right filled → straight; otherwise turn right.
    fn next_heading(&self, v: (i32, i32), d: (i32, i32)) -> (i32, i32) {
        let r = (-d.1, d.0);
        // Cells are addressed by their top-left corner: floor(v + (d ± r) / 2).
        let ahead_right = (v.0 + (d.0 + r.0).div_euclid(2), v.1 + (d.1 + r.1).div_euclid(2));
        let ahead_left = (v.0 + (d.0 - r.0).div_euclid(2), v.1 + (d.1 - r.1).div_euclid(2));
        if self.filled(ahead_left.0, ahead_left.1) {
            (d.1, -d.0)
        } else if self.filled(ahead_right.0, ahead_right.1) {
            d
        } else {
            (-d.1, d.0)
        }
    }

    /// Walk one closed boundary starting at `start` heading right. Every
    /// vertex where the heading changes is emitted; rightward edges are
    /// reported to `visit`.
    fn walk(&self, start: (i32, i32), mut visit: impl FnMut((i32, i32))) -> Vec<Pos2> {
        let (w, h) = (self.mask.width() as usize, self.mask.height() as usize);
        let max_steps = 4 * (w + 1) * (h + 1) + 4;

        let start_heading = (1, 0);
        let mut points = vec![Pos2::new(start.0 as f32, start.1 as f32)];
        let mut v = start;
        let mut d = start_heading;
        for step in 0..max_steps {
            let next = if step == 0 { start_heading } else { self.next_heading(v, d) };
            if step > 0 && v == start && next == start_heading {
                break;
            }
            if step > 0 && next != d {
                points.push(Pos2::new(v.0 as f32, v.1 as f32));
            }
            if next == (1, 0) {
                visit(v);
            }
            v = (v.0 + next.0, v.1 + next.1);
            d = next;
        }
        points
    }
}

/// Exact boundary of the component holding the first filled pixel in
/// row-major order, simplified with the default epsilon.
pub fn trace_boundary(mask: &SelectionMask) -> Outline {
    trace_boundary_with(mask, DEFAULT_SIMPLIFY_EPSILON)
}

pub fn trace_boundary_with(mask: &SelectionMask, epsilon: f32) -> Outline {
    let Some(start) = mask.filled().next() else {
        return Outline::default();
    };
    let walker = Walker { mask };
    let points = walker.walk(start, |_| {});
    Outline::new(simplify(points, epsilon))
}

/// Every boundary of the mask: outer boundaries have positive area, holes
/// negative. Ordered by the row-major position of their first top edge.
pub fn trace_all_boundaries(mask: &SelectionMask) -> Vec<Outline> {
    trace_all_boundaries_with(mask, DEFAULT_SIMPLIFY_EPSILON)
}

pub fn trace_all_boundaries_with(mask: &SelectionMask, epsilon: f32) -> Vec<Outline> {
    let walker = Walker { mask };
    let mut visited: HashSet<(i32, i32)> = HashSet::new();
    let mut outlines = Vec::new();
    for (x, y) in mask.filled() {
        // Top edge of (x, y) is a boundary edge heading right.
        if mask.contains(x, y - 1) || visited.contains(&(x, y)) {
            continue;
        }
        let points = walker.walk((x, y), |v| {
            visited.insert(v);
        });
        outlines.push(Outline::new(simplify(points, epsilon)));
    }
    outlines
}

/// Drop the middle vertex of every consecutive triple (wrap-around included)
/// whose triangle area is below `epsilon`, until nothing changes.
pub fn simplify(mut points: Vec<Pos2>, epsilon: f32) -> Vec<Pos2> {
    loop {
        let mut removed = false;
        let mut i = 0;
        while i < points.len() && points.len() >= 3 {
            let n = points.len();
            let area = cross(points[(i + n - 1) % n], points[i], points[(i + 1) % n]) * 0.5;
            if area.abs() < epsilon {
                points.remove(i);
                removed = true;
            } else {
                i += 1;
            }
        }
        if !removed || points.len() < 3 {
            return points;
        }
    }
}

/// Outline of `mask` with the chosen algorithm. Empty for an empty mask.
pub fn build_outline(mask: &SelectionMask, mode: OutlineMode) -> Outline {
    build_outline_with(mask, mode, DEFAULT_SIMPLIFY_EPSILON)
}

pub fn build_outline_with(mask: &SelectionMask, mode: OutlineMode, epsilon: f32) -> Outline {
    match mode {
        OutlineMode::Trace => trace_boundary_with(mask, epsilon),
        OutlineMode::ConvexHull => convex_hull(mask),
    }
}

// ============================================================================
// OUTLINE SETS - one ring per boundary of a multi-part mask
// ============================================================================

/// Every ring of `mask`: the traced outer boundary of each connected piece
/// plus its holes, or a single hull around the whole mask. Empty for an
/// empty mask.
pub fn build_outlines_with(mask: &SelectionMask, mode: OutlineMode, epsilon: f32) -> Vec<Outline> {
    match mode {
        OutlineMode::Trace => trace_all_boundaries_with(mask, epsilon),
        OutlineMode::ConvexHull => {
            let hull = convex_hull(mask);
            if hull.is_empty() { Vec::new() } else { vec![hull] }
        }
    }
}

/// Even-odd membership over a set of rings. A point inside a hole ring is
/// inside two rings and reads as outside.
pub fn rings_contain(rings: &[Outline], p: Pos2, eps: f32) -> bool {
    rings.iter().filter(|ring| ring.contains_eps(p, eps)).count() % 2 == 1
}

/// Area-weighted centroid of a ring set; hole rings carry negative area and
/// pull the centroid away from themselves. The vertex mean when the total
/// area is degenerate.
pub fn rings_centroid(rings: &[Outline]) -> Pos2 {
    let mut area = 0.0f64;
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for ring in rings {
        let a = ring.signed_area() as f64;
        let c = ring.centroid();
        area += a;
        cx += a * c.x as f64;
        cy += a * c.y as f64;
    }
    if area.abs() > 1e-9 {
        return Pos2::new((cx / area) as f32, (cy / area) as f32);
    }
    let (sum, n) = rings
        .iter()
        .flat_map(|ring| ring.points())
        .fold((egui::Vec2::ZERO, 0usize), |(sum, n), p| (sum + p.to_vec2(), n + 1));
    if n == 0 {
        return Pos2::ZERO;
    }
    Pos2::new(sum.x / n as f32, sum.y / n as f32)
}

// ============================================================================
// RASTERISATION
// ============================================================================

/// Scanline fill at pixel centres: a pixel is selected when its centre lies
/// in a half-open crossing interval `[x_a, x_b)` (even-odd pairing).
pub fn rasterize_outline(outline: &Outline, width: u32, height: u32) -> SelectionMask {
    let mut mask = SelectionMask::new(width, height);
    if outline.len() < 3 {
        return mask;
    }
    let Some(bounds) = outline.bounds() else {
        return mask;
    };
    let y_start = (bounds.min.y.floor() as i32).max(0);
    let y_end = (bounds.max.y.ceil() as i32).min(height as i32);

    let mut crossings: Vec<f32> = Vec::new();
    let mut spans: Vec<(i32, i32)> = Vec::new();
    for y in y_start..y_end {
        let py = y as f32 + 0.5;
        crossings.clear();
        for (a, b) in outline.edges() {
            if (a.y > py) != (b.y > py) {
                crossings.push(a.x + (py - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        spans.clear();
        for pair in crossings.chunks_exact(2) {
            let x0 = (pair[0] - 0.5).ceil() as i32;
            let x1 = (pair[1] - 0.5).ceil() as i32;
            if x1 > x0 {
                spans.push((x0, x1));
            }
        }
        mask.fill_spans(y, &spans);
    }
    mask
}
