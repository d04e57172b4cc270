//! Virtual fence polygon and the trespass decision.
//!
//! The fence is a fixed closed polygon in frame-pixel coordinates.  A
//! detection counts as trespassing when any corner of its bounding box lies
//! inside the fence or exactly on its boundary.  Corner-only testing is a
//! coarse approximation (a box can straddle the fence with no corner inside
//! it); that behaviour is intentional and kept as-is.

use anyhow::{bail, Context, Result};

use crate::detection::BBox;

/// A closed simple polygon in frame-pixel coordinates.  Built once per run
/// and passed into the pipeline; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FencePolygon {
    points: Vec<(i32, i32)>,
}

impl FencePolygon {
    /// Build a fence from an ordered vertex list.  At least three vertices
    /// are required; the polygon is implicitly closed (last → first).
    pub fn new(points: Vec<(i32, i32)>) -> Result<Self> {
        if points.len() < 3 {
            bail!("fence polygon needs at least 3 vertices, got {}", points.len());
        }
        Ok(Self { points })
    }

    /// Parse a fence from `"x,y x,y x,y ..."` (whitespace-separated vertex
    /// pairs), the format the CLI accepts.
    pub fn parse(s: &str) -> Result<Self> {
        let mut points = Vec::new();
        for pair in s.split_whitespace() {
            let (x, y) = pair
                .split_once(',')
                .with_context(|| format!("fence vertex `{pair}` is not of the form x,y"))?;
            let x = x
                .trim()
                .parse::<i32>()
                .with_context(|| format!("bad x coordinate in fence vertex `{pair}`"))?;
            let y = y
                .trim()
                .parse::<i32>()
                .with_context(|| format!("bad y coordinate in fence vertex `{pair}`"))?;
            points.push((x, y));
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[(i32, i32)] {
        &self.points
    }

    /// Inclusive point-in-polygon test: returns true for points strictly
    /// inside *and* for points on an edge or vertex.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (self.points[i].0 as f64, self.points[i].1 as f64);
            let (xj, yj) = (self.points[j].0 as f64, self.points[j].1 as f64);

            // Boundary counts as inside.
            if on_segment(x, y, xi, yi, xj, yj) {
                return true;
            }

            // Even-odd ray cast (horizontal ray towards +x).
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Corner test: true when any of the box's four corners is inside the
    /// fence (boundary inclusive).  Degenerate boxes are accepted as-is.
    pub fn is_trespassing(&self, bbox: &BBox) -> bool {
        let corners = [
            (bbox.x1, bbox.y1),
            (bbox.x2, bbox.y1),
            (bbox.x2, bbox.y2),
            (bbox.x1, bbox.y2),
        ];
        corners
            .iter()
            .any(|&(cx, cy)| self.contains(cx as f64, cy as f64))
    }
}

/// True when `(px, py)` lies on the segment from `(ax, ay)` to `(bx, by)`.
fn on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> bool {
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross != 0.0 {
        return false;
    }
    px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}
